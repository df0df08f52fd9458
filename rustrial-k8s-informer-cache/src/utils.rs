pub(crate) fn metric_name(name: &str) -> String {
    format!("informer_cache_{}", name)
}

/// Trimmed value of environment variable `name`, `None` if unset or blank.
pub(crate) fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
