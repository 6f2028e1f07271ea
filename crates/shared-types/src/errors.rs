//! # Shared Error Types
//!
//! Errors that cross subsystem boundaries. Subsystem-local failures live in
//! their own crates; only encoding and enforcement-mode parsing are shared.

use thiserror::Error;

/// Errors raised while encoding, decoding or hashing wire payloads.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// Malformed hex string (bad prefix, length or characters).
    #[error("invalid hex: {0}")]
    BadHex(String),

    /// JSON (de)serialization failure.
    #[error("json: {0}")]
    Json(String),

    /// A decimal big-integer string failed to parse.
    #[error("invalid decimal integer: {0}")]
    BadDecimal(String),

    /// A structurally valid payload is missing a required field.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e.to_string())
    }
}

/// How strictly a verification layer treats failures.
///
/// Used by block proposer-signature checking and P2P inbound auth: `Off`
/// skips the check, `Monitor` logs violations and lets the payload through,
/// `Enforce` rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforcementMode {
    Off,
    Monitor,
    #[default]
    Enforce,
}

impl EnforcementMode {
    /// Parse the textual configuration value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "monitor" => Some(Self::Monitor),
            "enforce" => Some(Self::Enforce),
            _ => None,
        }
    }

    pub fn is_enforce(&self) -> bool {
        matches!(self, Self::Enforce)
    }

    pub fn is_off(&self) -> bool {
        matches!(self, Self::Off)
    }
}
