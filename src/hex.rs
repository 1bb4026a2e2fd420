//! Hex strings as they appear in RPC payloads, config files and cell data.
//!
//! Byte strings take an optional `0x` prefix and an even number of digits.
//! Integers take an optional prefix and at least one digit, and are never
//! bounded by a machine word.

use faster_hex::{hex_decode, hex_string};
use num_bigint::BigUint;

use crate::error::{Error, Result};

fn strip_prefix(input: &str) -> &str {
    input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input)
}

pub fn hex_to_bytes(input: &str) -> Result<Vec<u8>> {
    let digits = strip_prefix(input);
    if digits.len() % 2 != 0 {
        return Err(Error::Format(format!(
            "odd number of hex digits in {:?}",
            input
        )));
    }
    if digits.is_empty() {
        return Ok(Vec::new());
    }
    let mut dst = vec![0u8; digits.len() / 2];
    hex_decode(digits.as_bytes(), &mut dst)
        .map_err(|err| Error::Format(format!("{:?} is not hex: {}", input, err)))?;
    Ok(dst)
}

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex_string(bytes))
}

/// Lowercase, `0x`-prefixed form of a hex byte string.
pub fn normalize(input: &str) -> Result<String> {
    hex_to_bytes(input).map(|bytes| bytes_to_hex(&bytes))
}

/// Parse a 32-byte hash.
pub fn hex_to_h256(input: &str) -> Result<[u8; 32]> {
    let bytes = hex_to_bytes(input)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Format(format!("expected 32 bytes, got {}", bytes.len())))
}

pub fn hex_to_uint(input: &str) -> Result<BigUint> {
    let digits = strip_prefix(input);
    if digits.is_empty() {
        return Err(Error::Format(format!("{:?} has no hex digits", input)));
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Format(format!("{:?} is not a hex integer", input)));
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| Error::Format(format!("{:?} is not a hex integer", input)))
}

pub fn uint_to_hex(value: &BigUint) -> String {
    if value.bits() == 0 {
        "0x0".to_string()
    } else {
        format!("0x{:x}", value)
    }
}

pub fn hex_to_u64(input: &str) -> Result<u64> {
    let value = hex_to_uint(input)?;
    u64::try_from(value).map_err(|_| Error::Format(format!("{:?} overflows u64", input)))
}

pub fn u64_to_hex(value: u64) -> String {
    format!("{:#x}", value)
}

/// Cell data encoding of a counter: 8 bytes little-endian.
pub fn u64_to_le_hex(value: u64) -> String {
    bytes_to_hex(&value.to_le_bytes())
}

pub fn u64_from_le_bytes(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Format(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hex_to_bytes() {
        assert_eq!(hex_to_bytes("0x").unwrap(), Vec::<u8>::new());
        assert_eq!(hex_to_bytes("").unwrap(), Vec::<u8>::new());
        assert_eq!(hex_to_bytes("0xDEADbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(hex_to_bytes("0X01").unwrap(), vec![1]);
        assert!(matches!(hex_to_bytes("0x123"), Err(Error::Format(_))));
        assert!(matches!(hex_to_bytes("0xzz"), Err(Error::Format(_))));
        assert!(matches!(hex_to_bytes("0x0x"), Err(Error::Format(_))));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("ABCD").unwrap(), "0xabcd");
        assert_eq!(normalize("0x").unwrap(), "0x");
    }

    #[test]
    fn test_uint() {
        assert_eq!(hex_to_u64("0x174876e800").unwrap(), 100_000_000_000);
        assert_eq!(u64_to_hex(100_000_000_000), "0x174876e800");
        assert_eq!(u64_to_hex(0), "0x0");
        assert!(hex_to_uint("0x").is_err());
        assert!(hex_to_u64("0x10000000000000000").is_err());
        let big = hex_to_uint("0x10000000000000000").unwrap();
        assert_eq!(uint_to_hex(&big), "0x10000000000000000");
        assert_eq!(uint_to_hex(&BigUint::from(0u8)), "0x0");
    }

    #[test]
    fn test_uint_rejects_separators_and_signs() {
        assert!(matches!(hex_to_uint("0x1_0"), Err(Error::Format(_))));
        assert!(matches!(hex_to_uint("0x+ff"), Err(Error::Format(_))));
        assert!(matches!(hex_to_u64("-1"), Err(Error::Format(_))));
        assert_eq!(hex_to_u64("0xFF").unwrap(), 255);
    }

    #[test]
    fn test_le_counter() {
        assert_eq!(u64_to_le_hex(1), "0x0100000000000000");
        let bytes = hex_to_bytes(&u64_to_le_hex(42)).unwrap();
        assert_eq!(u64_from_le_bytes(&bytes).unwrap(), 42);
        assert!(u64_from_le_bytes(&[1, 2, 3]).is_err());
    }

    proptest! {
        #[test]
        fn hex_round_trip_normalizes(bytes in proptest::collection::vec(any::<u8>(), 0..64), upper in any::<bool>(), prefixed in any::<bool>()) {
            let mut s = hex_string(&bytes);
            if upper {
                s = s.to_uppercase();
            }
            if prefixed {
                s = format!("0x{}", s);
            }
            let decoded = hex_to_bytes(&s).unwrap();
            prop_assert_eq!(bytes_to_hex(&decoded), normalize(&s).unwrap());
            prop_assert_eq!(decoded, bytes);
        }

        #[test]
        fn odd_length_is_rejected(s in "[0-9a-f]([0-9a-f]{2}){0,15}") {
            prop_assert!(hex_to_bytes(&s).is_err());
        }
    }
}
