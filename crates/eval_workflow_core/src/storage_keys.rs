#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultObjectKind {
    Succeeded,
    Failed,
    Summary,
}

impl ResultObjectKind {
    fn file_name(self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCEEDED_0.json",
            Self::Failed => "FAILED_0.json",
            Self::Summary => "manifest.json",
        }
    }
}

/// Every execution writes below its own prefix, so re-runs over the same
/// manifest never overwrite earlier results.
pub fn execution_prefix(base_prefix: &str, execution_id: &str) -> String {
    let trimmed = base_prefix.trim_matches('/');
    if trimmed.is_empty() {
        execution_id.to_string()
    } else {
        format!("{trimmed}/{execution_id}")
    }
}

pub fn result_object_key(base_prefix: &str, execution_id: &str, kind: ResultObjectKind) -> String {
    format!(
        "{}/{}",
        execution_prefix(base_prefix, execution_id),
        kind.file_name()
    )
}

pub fn succeeded_object_key(base_prefix: &str, execution_id: &str) -> String {
    result_object_key(base_prefix, execution_id, ResultObjectKind::Succeeded)
}

pub fn failed_object_key(base_prefix: &str, execution_id: &str) -> String {
    result_object_key(base_prefix, execution_id, ResultObjectKind::Failed)
}

pub fn summary_object_key(base_prefix: &str, execution_id: &str) -> String {
    result_object_key(base_prefix, execution_id, ResultObjectKind::Summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_succeeded_key_under_execution_prefix() {
        let key = succeeded_object_key("output/", "exec-123");
        assert_eq!(key, "output/exec-123/SUCCEEDED_0.json");
    }

    #[test]
    fn builds_failed_key() {
        let key = failed_object_key("/output", "exec-123");
        assert_eq!(key, "output/exec-123/FAILED_0.json");
    }

    #[test]
    fn builds_summary_key() {
        let key = summary_object_key("results/criteria", "exec-9");
        assert_eq!(key, "results/criteria/exec-9/manifest.json");
    }

    #[test]
    fn empty_prefix_writes_at_bucket_root() {
        let key = succeeded_object_key("", "exec-1");
        assert_eq!(key, "exec-1/SUCCEEDED_0.json");
    }
}
