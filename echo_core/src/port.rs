use crate::error::{EchoError, Result};

/// Parses a candidate port number from raw operator input.
///
/// Returns `Some(port)` when the trimmed text is an integer in 1-65535,
/// `None` otherwise. Unparseable input yields absence, not an error value;
/// surfacing the refusal to the operator is the caller's job.
pub fn parse(text: &str) -> Option<u16> {
    match text.trim().parse::<u16>() {
        Ok(0) => None,
        Ok(port) => Some(port),
        Err(_) => None,
    }
}

/// Like [`parse`], for call sites that want the refusal as an error value.
pub fn require(text: &str) -> Result<u16> {
    parse(text).ok_or_else(|| EchoError::InvalidPort(text.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_accepts_valid_range() {
        assert_eq!(parse("1"), Some(1));
        assert_eq!(parse("8080"), Some(8080));
        assert_eq!(parse("65535"), Some(65535));
        assert_eq!(parse("  7777 "), Some(7777));
    }

    #[test]
    fn test_parse_rejects_invalid_input() {
        assert_eq!(parse("0"), None);
        assert_eq!(parse("65536"), None);
        assert_eq!(parse("99999"), None);
        assert_eq!(parse("abc"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("-1"), None);
        assert_eq!(parse("80.5"), None);
        assert_eq!(parse("80 81"), None);
    }

    #[test]
    fn test_require_carries_the_offending_text() {
        let err = require(" 99999 ").unwrap_err();
        assert!(matches!(err, EchoError::InvalidPort(ref text) if text == "99999"));
    }

    proptest! {
        #[test]
        fn test_every_valid_port_parses(port in 1u16..=65535) {
            prop_assert_eq!(parse(&port.to_string()), Some(port));
        }

        #[test]
        fn test_out_of_range_numbers_are_rejected(n in 65536u64..10_000_000) {
            prop_assert_eq!(parse(&n.to_string()), None);
        }
    }
}
