//! State layer errors.

use thiserror::Error;

use coc_storage::StorageError;

/// Errors from the state store and snapshot codec.
#[derive(Debug, Error)]
pub enum StateError {
    /// Underlying KV failure.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// A flat record failed to decode.
    #[error("corrupt state record: {0}")]
    Corrupt(String),

    /// Snapshot version is not supported.
    #[error("unsupported snapshot version {0}")]
    BadSnapshotVersion(u32),

    /// Snapshot is missing a required field.
    #[error("snapshot missing field: {0}")]
    SnapshotMissingField(&'static str),

    /// Imported state committed to a different root than expected.
    #[error("state root mismatch: expected {expected}, computed {computed}")]
    RootMismatch { expected: String, computed: String },

    /// Debit larger than the account balance.
    #[error("insufficient balance for {address}")]
    InsufficientBalance { address: String },
}
