//! Environment variable parsing helpers.

/// Reads a boolean flag; `true`, `1`, and `yes` are true, anything else false.
#[must_use]
pub fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        let value = value.to_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}

/// Reads a trimmed, non-empty string.
#[must_use]
pub fn parse_string_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
