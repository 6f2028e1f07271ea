//! # Stable JSON Codec
//!
//! Every hashed or signed payload in the protocol is encoded with the same
//! stable stringifier: object keys sorted recursively, arrays preserved in
//! order, big integers rendered as decimal strings. Two nodes that encode
//! the same value must produce byte-identical output, otherwise block hashes
//! and signatures diverge.

use primitive_types::U256;
use serde::Serialize;
use serde_json::Value;
use sha3::{Digest, Keccak256};

use crate::errors::CodecError;
use crate::hex32::Hash32;

/// Keccak-256 over raw bytes.
pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash32(hasher.finalize().into())
}

/// Render a JSON value with recursively sorted object keys.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

/// Serialize a value and return its stable string rendering.
pub fn to_stable_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let v = serde_json::to_value(value)?;
    Ok(stable_stringify(&v))
}

/// Keccak-256 of a value's stable JSON rendering.
pub fn stable_hash<T: Serialize>(value: &T) -> Result<Hash32, CodecError> {
    Ok(keccak256(to_stable_json(value)?.as_bytes()))
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys never need escaping beyond what serde_json provides.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_stable(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        other => {
            out.push_str(&serde_json::to_string(other).unwrap_or_default());
        }
    }
}

/// Serde adapter rendering `U256` as a decimal string.
///
/// `primitive_types`' own serde impl emits `0x` hex; protocol payloads carry
/// decimal strings instead, so every `U256` field opts in via
/// `#[serde(with = "u256_dec")]`.
pub mod u256_dec {
    use super::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}

/// `Option<U256>` variant of [`u256_dec`]; absent fields stay absent.
pub mod u256_dec_opt {
    use super::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => U256::from_dec_str(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_recursively() {
        let v = json!({"b": {"z": 1, "a": [ {"y": 2, "x": 3} ]}, "a": true});
        assert_eq!(
            stable_stringify(&v),
            r#"{"a":true,"b":{"a":[{"x":3,"y":2}],"z":1}}"#
        );
    }

    #[test]
    fn arrays_keep_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(stable_stringify(&v), "[3,1,2]");
    }

    #[test]
    fn identical_values_hash_identically() {
        let a = json!({"k1": "v", "k2": 7});
        let b = json!({"k2": 7, "k1": "v"});
        assert_eq!(
            keccak256(stable_stringify(&a).as_bytes()),
            keccak256(stable_stringify(&b).as_bytes())
        );
    }

    #[test]
    fn u256_decimal_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Fee {
            #[serde(with = "u256_dec")]
            amount: U256,
        }
        let fee = Fee {
            amount: U256::from_dec_str("340282366920938463463374607431768211456").unwrap(),
        };
        let s = serde_json::to_string(&fee).unwrap();
        assert!(s.contains("\"340282366920938463463374607431768211456\""));
        let back: Fee = serde_json::from_str(&s).unwrap();
        assert_eq!(back.amount, fee.amount);
    }

    #[test]
    fn string_escapes_survive_stable_rendering() {
        let v = json!({"msg": "line\n\"quoted\""});
        let rendered = stable_stringify(&v);
        let back: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(back, v);
    }
}
