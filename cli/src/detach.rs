use std::process::{Command, Stdio};

/// Starts `emrakul <args..>` detached from this terminal and returns its pid.
///
/// The child gets null stdio and its own process group, so it outlives the
/// invoking shell and is not hit by the shell's Ctrl-C.
pub fn spawn_self(args: &[&str]) -> std::io::Result<u32> {
    let exe = std::env::current_exe()?;
    let mut cmd = Command::new(exe);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let child = cmd.spawn()?;
    Ok(child.id())
}
