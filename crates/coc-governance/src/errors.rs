//! Governance error types.

use thiserror::Error;

/// Failures in set mutation, proposal handling and the side registries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("unknown validator: {0}")]
    UnknownValidator(String),

    #[error("validator already exists: {0}")]
    DuplicateValidator(String),

    #[error("validator set is at capacity ({0})")]
    SetFull(usize),

    #[error("stake below minimum")]
    StakeBelowMinimum,

    #[error("cannot deactivate the last active validator")]
    LastValidator,

    #[error("unknown proposal: {0}")]
    UnknownProposal(String),

    #[error("proposal is not pending")]
    ProposalClosed,

    #[error("voter is not an active validator: {0}")]
    NotAValidator(String),

    #[error("treasury deposits must be positive")]
    NonPositiveDeposit,
}
