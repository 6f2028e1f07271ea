//! Mempool error types.

use primitive_types::U256;
use thiserror::Error;

/// Admission and packing failures. Every variant rejects at the boundary
/// with no pool state change (eviction happens only on a successful admit).
#[derive(Debug, Clone, Error)]
pub enum MempoolError {
    /// The raw transaction failed to decode.
    #[error("malformed transaction: {0}")]
    Decode(String),

    /// Transaction targets a different chain.
    #[error("wrong chain id: got {got}, expected {expected}")]
    ChainIdMismatch { got: u64, expected: u64 },

    /// Admission requires a signed transaction.
    #[error("missing signature")]
    MissingSignature,

    /// The signature did not recover to a usable sender.
    #[error("invalid signature: {0}")]
    BadSignature(String),

    /// The hash is already queued.
    #[error("tx already known")]
    AlreadyKnown,

    /// Bid below the admission floor.
    #[error("gas price {price} below minimum {minimum}")]
    GasPriceTooLow { price: U256, minimum: U256 },

    /// A `(sender, nonce)` slot is occupied and the bump is too small.
    #[error("replacement gas price too low")]
    ReplacementUnderpriced,

    /// The sender already has the maximum pending transactions.
    #[error("sender has too many pending transactions (limit {limit})")]
    SenderLimitReached { limit: usize },

    /// The pool is full and eviction could not make room.
    #[error("mempool full")]
    PoolFull,
}
