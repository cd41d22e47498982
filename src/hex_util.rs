//! Canonicalization of the hex-encoded fields handed to us by wallet consumers.

use crate::error::{ProviderError, Result};

/// Strip one leading `0x` / `0X`, if present.
pub fn strip_hex_prefix(hex: &str) -> &str {
    hex.strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex)
}

/// Strip the prefix and left-pad to an even number of nibbles.
///
/// `None` stays `None`. Applying it twice gives the same result as applying it once.
pub fn normalize_hex(hex: Option<&str>) -> Option<String> {
    let hex = strip_hex_prefix(hex?);
    if hex.len() % 2 != 0 {
        Some(format!("0{}", hex))
    } else {
        Some(hex.to_string())
    }
}

/// Decode a hex field into raw bytes. An absent field is an empty buffer.
pub fn to_bytes(hex: Option<&str>) -> Result<Vec<u8>> {
    match normalize_hex(hex) {
        None => Ok(Vec::new()),
        Some(normalized) => hex::decode(&normalized)
            .map_err(|e| ProviderError::Format(format!("'{}': {}", normalized, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_prefix_and_pads() {
        assert_eq!(normalize_hex(Some("0x1")).as_deref(), Some("01"));
        assert_eq!(normalize_hex(Some("0XABC")).as_deref(), Some("0ABC"));
        assert_eq!(normalize_hex(Some("dead")).as_deref(), Some("dead"));
        assert_eq!(normalize_hex(Some("0x")).as_deref(), Some(""));
        assert_eq!(normalize_hex(None), None);
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in ["0x1", "0x", "abc", "0x00ff", "0X7", "", "0x0x1"] {
            let once = normalize_hex(Some(input));
            let twice = normalize_hex(once.as_deref());
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn to_bytes_round_trips_even_hex() {
        for input in ["", "00", "0a0b0c", "deadbeef", "ffffffffffffffffffffffffffffffffffffffff"] {
            let bytes = to_bytes(Some(input)).unwrap();
            assert_eq!(hex::encode(bytes), input);
        }
    }

    #[test]
    fn to_bytes_of_absent_field_is_empty() {
        assert!(to_bytes(None).unwrap().is_empty());
    }

    #[test]
    fn to_bytes_pads_odd_values() {
        assert_eq!(to_bytes(Some("0x1")).unwrap(), vec![0x01]);
        assert_eq!(to_bytes(Some("0x100")).unwrap(), vec![0x01, 0x00]);
    }

    #[test]
    fn to_bytes_rejects_non_hex() {
        let err = to_bytes(Some("0xzz")).unwrap_err();
        assert!(matches!(err, ProviderError::Format(_)));
    }
}
