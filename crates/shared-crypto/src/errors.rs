//! Error types for signing and recovery.

use thiserror::Error;

/// Errors raised by the signer and verifier.
#[derive(Debug, Clone, Error)]
pub enum CryptoError {
    /// The 32-byte private key did not form a valid scalar.
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// A signature string failed to parse (length, hex, or recovery byte).
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// The signature parsed but recovery failed.
    #[error("signature recovery failed")]
    RecoveryFailed,

    /// Signing itself failed (should not happen with a valid key).
    #[error("signing failed")]
    SigningFailed,
}
