//! Chain engine error types.

use thiserror::Error;

use coc_mempool::MempoolError;
use coc_state::StateError;
use coc_storage::StorageError;

/// Everything that can stop a proposal or reject a block. Rejected blocks
/// are never rebroadcast; storage failures abort the whole tick.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A raw transaction or block payload failed to decode.
    #[error("decode: {0}")]
    Decode(String),

    /// The transaction hash is already in the nonce registry.
    #[error("tx already confirmed")]
    TxAlreadyConfirmed,

    /// Admission failed in the pool.
    #[error(transparent)]
    Mempool(#[from] MempoolError),

    /// KV layer failure; fatal to the current tick.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// State store failure.
    #[error(transparent)]
    State(#[from] StateError),

    /// Parent/height/hash linkage violation.
    #[error("chain link: {0}")]
    Link(String),

    /// Block proposed by the wrong validator.
    #[error("wrong proposer: expected {expected}, got {got}")]
    WrongProposer { expected: String, got: String },

    /// Timestamp monotonicity or future-bound violation.
    #[error("timestamp: {0}")]
    Timestamp(String),

    /// Cumulative weight disagrees with the parent and proposer stake.
    #[error("cumulative weight mismatch: expected {expected}, got {got}")]
    Weight { expected: String, got: String },

    /// Proposer signature missing or not recovering (enforce mode).
    #[error("proposer signature: {0}")]
    Signature(String),

    /// Block gas accounting violation.
    #[error("gas: {0}")]
    Gas(String),

    /// Recursive apply attempt; a programming error.
    #[error("apply already in flight")]
    ApplyInFlight,

    /// Snapshot adoption precondition failed.
    #[error("snapshot: {0}")]
    Snapshot(String),

    /// Local signing failed.
    #[error("signing: {0}")]
    Signing(String),
}
