//! String utilities
//!
//! Contains helper functions for safe string manipulation.

/// Safely truncate a string at a character boundary
///
/// This function truncates a string to at most `max_chars` characters,
/// ensuring the truncation happens at a valid UTF-8 character boundary.
/// Used to keep session tokens and prompts short in log output.
///
/// # Example
/// ```
/// use rocket_community_proxy::utils::truncate_str;
///
/// let text = "Hello, World!";
/// assert_eq!(truncate_str(text, 5), "Hello");
/// assert_eq!(truncate_str(text, 100), "Hello, World!");
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Safely truncate a string and append a suffix if truncated
///
/// # Example
/// ```
/// use rocket_community_proxy::utils::truncate_with_suffix;
///
/// assert_eq!(truncate_with_suffix("sk-very-long-token", 6, "..."), "sk-ver...");
/// assert_eq!(truncate_with_suffix("short", 6, "..."), "short");
/// ```
pub fn truncate_with_suffix(s: &str, max_chars: usize, suffix: &str) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}{}", truncate_str(s, max_chars), suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_ascii() {
        let text = "Hello, World!";
        assert_eq!(truncate_str(text, 5), "Hello");
        assert_eq!(truncate_str(text, 100), "Hello, World!");
    }

    #[test]
    fn test_truncate_str_unicode() {
        let text = "Hello, 世界!";
        assert_eq!(truncate_str(text, 7), "Hello, ");
        assert_eq!(truncate_str(text, 8), "Hello, 世");
        assert_eq!(truncate_str(text, 9), "Hello, 世界");
    }

    #[test]
    fn test_truncate_with_suffix() {
        assert_eq!(truncate_with_suffix("Hello, World!", 5, "..."), "Hello...");
        assert_eq!(truncate_with_suffix("Hi", 5, "..."), "Hi");
    }

    #[test]
    fn test_truncate_empty() {
        assert_eq!(truncate_str("", 10), "");
        assert_eq!(truncate_with_suffix("", 10, "..."), "");
    }
}
