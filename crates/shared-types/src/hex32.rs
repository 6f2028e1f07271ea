//! # Hex Primitives
//!
//! Fixed-width byte strings with the canonical `0x` + lowercase-hex encoding.
//! Hashes are 32 bytes, addresses 20 bytes. Both serialize as hex strings so
//! every wire payload and every hashed preimage sees the same rendering.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::CodecError;

/// A 32-byte hash rendered as `0x` + 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32(pub [u8; 32]);

/// A 20-byte account address rendered as `0x` + 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], CodecError> {
    let stripped = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| CodecError::BadHex(format!("missing 0x prefix: {s}")))?;
    if stripped.len() != N * 2 {
        return Err(CodecError::BadHex(format!(
            "expected {} hex chars, got {}",
            N * 2,
            stripped.len()
        )));
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(stripped, &mut out).map_err(|e| CodecError::BadHex(e.to_string()))?;
    Ok(out)
}

impl Hash32 {
    /// The all-zero hash, used as the genesis parent link.
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        Ok(Self(parse_fixed::<32>(s)?))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Address {
    /// The zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        Ok(Self(parse_fixed::<20>(s)?))
    }

    /// Lowercase hex rendering; this string doubles as the node id on the
    /// wire, so it must never carry mixed case.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

macro_rules! impl_hex_traits {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "({})"), self.to_hex())
            }
        }

        impl FromStr for $ty {
            type Err = CodecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

impl_hex_traits!(Hash32);
impl_hex_traits!(Address);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_roundtrip() {
        let h = Hash32([0xabu8; 32]);
        let s = h.to_hex();
        assert_eq!(s.len(), 66);
        assert_eq!(Hash32::from_hex(&s).unwrap(), h);
    }

    #[test]
    fn address_accepts_uppercase_input() {
        let a = Address::from_hex("0xDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF").unwrap();
        // Output is always lowercase regardless of input casing.
        assert_eq!(a.to_hex(), "0xdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef");
    }

    #[test]
    fn rejects_wrong_length_and_missing_prefix() {
        assert!(Hash32::from_hex("0x1234").is_err());
        assert!(Address::from_hex("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef").is_err());
    }

    #[test]
    fn serde_renders_hex_string() {
        let h = Hash32::ZERO;
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "0".repeat(64)));
        let back: Hash32 = serde_json::from_str(&json).unwrap();
        assert!(back.is_zero());
    }

    #[test]
    fn byte_order_matches_hex_string_order() {
        // Fork choice compares lowercase hex strings; `Ord` on the raw bytes
        // must agree with that comparison.
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 0x0f;
        b[0] = 0xf0;
        let (ha, hb) = (Hash32(a), Hash32(b));
        assert_eq!(ha.cmp(&hb), ha.to_hex().cmp(&hb.to_hex()));
    }
}
