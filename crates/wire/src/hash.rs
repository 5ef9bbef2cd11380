//! Short digest and base-36 helpers.
//!
//! The digest is a 32-bit-truncated rolling hash rendered base-36, used
//! to content-address metadata blocks for deduplication. It is
//! deterministic but not collision-free: two different blocks can share
//! a digest, in which case deduplication is silently wrong. That risk
//! is structural and accepted; see DESIGN.md.

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Deterministic short digest of a string: djb2-style rolling hash
/// truncated to 32 bits, base-36 encoded (at most 7 characters).
pub fn digest(input: &str) -> String {
    let mut hash: u32 = 5381;
    for byte in input.as_bytes() {
        hash = hash.wrapping_mul(33) ^ u32::from(*byte);
    }
    to_base36(i64::from(hash))
}

/// Base-36 render of a signed integer, lowercase, `-` prefix for
/// negatives. Mirrors `from_base36`.
pub fn to_base36(value: i64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut digits = Vec::with_capacity(14);
    while magnitude > 0 {
        digits.push(BASE36[(magnitude % 36) as usize]);
        magnitude /= 36;
    }
    if negative {
        digits.push(b'-');
    }
    digits.reverse();
    // Digits come straight out of the base-36 table, always ASCII.
    String::from_utf8(digits).unwrap_or_default()
}

/// Parse a base-36 integer. `None` for anything that is not one.
pub fn from_base36(input: &str) -> Option<i64> {
    if input.is_empty() {
        return None;
    }
    i64::from_str_radix(input, 36).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic_and_short() {
        let a = digest("class=button primary");
        let b = digest("class=button primary");
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert!(a.len() <= 7);
    }

    #[test]
    fn test_digest_differs_for_different_input() {
        assert_ne!(digest("div"), digest("span"));
    }

    #[test]
    fn test_base36_round_trip() {
        for value in [0i64, 1, 35, 36, 1295, -1, -36, 1_000_000, i64::from(u32::MAX)] {
            assert_eq!(from_base36(&to_base36(value)), Some(value), "value {value}");
        }
    }

    #[test]
    fn test_base36_rejects_garbage() {
        assert_eq!(from_base36(""), None);
        assert_eq!(from_base36("12*34"), None);
        assert_eq!(from_base36("k=v"), None);
    }
}
