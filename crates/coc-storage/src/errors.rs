//! Storage error types.

use thiserror::Error;

/// Errors from the storage layer. All variants are fatal to the current
/// tick; the caller decides whether to retry.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend read/write failure.
    #[error("kv io: {0}")]
    Io(String),

    /// A stored record failed to deserialize.
    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Attempt to rewrite an occupied height without `update_block`.
    #[error("height {0} already written")]
    HeightOccupied(u64),

    /// A record that must exist is missing.
    #[error("missing record: {0}")]
    Missing(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}
