use uuid::Uuid;

fn short_uuid() -> String {
    let mut s = Uuid::new_v4().simple().to_string();
    s.truncate(8);
    s
}

/// `codex-1a2b3c4d` style task ids.
pub fn new_task_id(prefix: &str) -> String {
    format!("{}-{}", prefix, short_uuid())
}

pub fn new_batch_id() -> String {
    format!("batch-{}", short_uuid())
}

/// Ids double as file names in the durable store.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_safe() {
        let id = new_task_id("codex");
        assert!(id.starts_with("codex-"));
        assert_eq!(id.len(), "codex-".len() + 8);
        assert!(is_safe_id(&id));
        assert!(is_safe_id(&new_batch_id()));
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!(!is_safe_id("../etc/passwd"));
        assert!(!is_safe_id(".hidden"));
        assert!(!is_safe_id("a/b"));
        assert!(!is_safe_id(""));
    }
}
