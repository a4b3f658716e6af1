//! Channel naming rules.

use crate::DELIMITER;

/// Reserved pseudo-channel every connected client implicitly belongs to.
pub const ALL_CHANNEL: &str = "ALL";

/// Normalize a channel name.
///
/// Trims surrounding whitespace, upper-cases, and strips every occurrence of
/// [`DELIMITER`], so a channel name can never be read back as a field
/// separator.
pub fn sanitize_channel_name(name: &str) -> String {
    name.trim()
        .to_uppercase()
        .chars()
        .filter(|&c| c != DELIMITER)
        .collect()
}

/// Check whether a (raw, unsanitized) channel name refers to [`ALL_CHANNEL`].
pub fn is_all_channel(name: &str) -> bool {
    sanitize_channel_name(name) == ALL_CHANNEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_trims_and_uppercases() {
        assert_eq!(sanitize_channel_name("  Sports "), "SPORTS");
        assert_eq!(sanitize_channel_name("news"), "NEWS");
    }

    #[test]
    fn test_sanitize_strips_delimiters() {
        assert_eq!(sanitize_channel_name("a:b:c"), "ABC");
        assert_eq!(sanitize_channel_name(":::"), "");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let once = sanitize_channel_name(" mixed:Case ");
        assert_eq!(sanitize_channel_name(&once), once);
    }

    #[test]
    fn test_is_all_channel() {
        assert!(is_all_channel("ALL"));
        assert!(is_all_channel("all"));
        assert!(is_all_channel(" All "));
        assert!(is_all_channel("a:ll"));
        assert!(!is_all_channel("ALLY"));
        assert!(!is_all_channel(""));
    }
}
