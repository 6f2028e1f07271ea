//! PoSe error types.

use thiserror::Error;

/// Pipeline failures. Proof failures emit evidence and score down; they
/// never stop the agent tick.
#[derive(Debug, Error)]
pub enum PoseError {
    /// The per-epoch quota refuses another challenge of this type.
    #[error("quota exhausted for {0}")]
    QuotaExhausted(&'static str),

    /// A signature did not recover to the expected party.
    #[error("signature: {0}")]
    Signature(String),

    /// The challenge-specific result check failed.
    #[error("proof: {0}")]
    Proof(String),

    /// A replayed challenge tuple.
    #[error("replayed challenge nonce")]
    Replay,

    /// The probe target never answered in time.
    #[error("target timeout: {0}")]
    Timeout(String),

    /// Journal or registry I/O failure.
    #[error("journal: {0}")]
    Journal(String),

    /// The external L1/RPC call failed.
    #[error("rpc: {0}")]
    Rpc(String),

    /// A malformed receipt or response body.
    #[error("malformed: {0}")]
    Malformed(String),
}

impl From<coc_storage::StorageError> for PoseError {
    fn from(e: coc_storage::StorageError) -> Self {
        PoseError::Journal(e.to_string())
    }
}

impl From<std::io::Error> for PoseError {
    fn from(e: std::io::Error) -> Self {
        PoseError::Journal(e.to_string())
    }
}
