use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Data directory: `$EMRAKUL_HOME`, else `~/.emrakul`.
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(v) = std::env::var("EMRAKUL_HOME") {
        if !v.trim().is_empty() {
            return Ok(expand_path(&v));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".emrakul"))
}

/// Expands `~` and environment references in user supplied paths.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw.trim()).into_owned())
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    let data_dir = get_data_dir()?;

    // Priority 1: $EMRAKUL_CONFIG
    // Priority 2: ~/.emrakul/config.toml
    // Priority 3: ./emrakul.toml
    let explicit = std::env::var("EMRAKUL_CONFIG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| expand_path(&v));
    let home_config = data_dir.join("config.toml");
    let local_config = Path::new("emrakul.toml");

    let cfg = if let Some(path) = explicit {
        load_from_path(&path)?
    } else if home_config.exists() {
        load_from_path(&home_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    Ok(finalize(cfg, &data_dir))
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read config {} failed: {e}", path.display()))?;
    toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("parse config {} failed: {e}", path.display()))
}

/// Fills path defaults relative to `data_dir` and applies environment overrides.
pub fn finalize(mut cfg: AppConfig, data_dir: &Path) -> AppConfig {
    if cfg.data_dir.trim().is_empty() {
        cfg.data_dir = data_dir.to_string_lossy().to_string();
    } else {
        cfg.data_dir = expand_path(&cfg.data_dir).to_string_lossy().to_string();
    }
    let root = PathBuf::from(&cfg.data_dir);

    cfg.store.directory = Some(match cfg.store.directory.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => expand_path(d).to_string_lossy().to_string(),
        _ => root.join("tasks").to_string_lossy().to_string(),
    });

    cfg.logging.directory = Some(match cfg.logging.directory.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => expand_path(d).to_string_lossy().to_string(),
        _ => root.join("logs").to_string_lossy().to_string(),
    });

    if let Some(dir) = cfg.prompts_dir.as_deref() {
        cfg.prompts_dir = Some(expand_path(dir).to_string_lossy().to_string());
    }

    // Environment variable overrides (highest priority)
    if let Ok(v) = std::env::var("EMRAKUL_STORE_DIR") {
        if !v.trim().is_empty() {
            cfg.store.directory = Some(expand_path(&v).to_string_lossy().to_string());
        }
    }
    if let Ok(v) = std::env::var("EMRAKUL_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }

    cfg
}
