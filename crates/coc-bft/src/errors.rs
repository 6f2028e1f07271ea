//! Coordinator error types.

use thiserror::Error;

/// Failures at round boundaries. Vote handling never errors; stray votes
/// are dropped silently.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BftError {
    /// Proposed block is not at the expected height.
    #[error("proposed block at height {got}, expected {expected}")]
    WrongHeight { got: u64, expected: u64 },

    /// A round is already running for this height.
    #[error("round already in flight at height {0}")]
    RoundInFlight(u64),
}
