//! Common helper functions for Frontdesk.

use std::str::FromStr;

/// Read a boolean flag from the environment (`1`, `true`, `yes`, `on`).
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Parse an environment variable, falling back to `default` when unset or malformed.
pub fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Channel identifiers name a kiosk or a front desk station; keep them short and printable.
pub fn is_valid_channel(channel: &str) -> bool {
    !channel.is_empty()
        && channel.len() <= 64
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_bool_default_when_unset() {
        assert!(env_bool("FRONTDESK_TEST_UNSET_FLAG", true));
        assert!(!env_bool("FRONTDESK_TEST_UNSET_FLAG", false));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("FRONTDESK_TEST_PARSE_GARBAGE", "not-a-number");
        assert_eq!(env_parse("FRONTDESK_TEST_PARSE_GARBAGE", 7u64), 7);
        std::env::set_var("FRONTDESK_TEST_PARSE_GARBAGE", " 42 ");
        assert_eq!(env_parse("FRONTDESK_TEST_PARSE_GARBAGE", 7u64), 42);
    }

    #[test]
    fn test_channel_validation() {
        assert!(is_valid_channel("kiosk-lobby-01"));
        assert!(is_valid_channel("desk.main:2"));
        assert!(!is_valid_channel(""));
        assert!(!is_valid_channel("lobby kiosk"));
        assert!(!is_valid_channel(&"a".repeat(65)));
    }
}
