//! # Validator Governance
//!
//! The active validator set with stake-weighted voting power, governance
//! proposals, slashing, and the faction/treasury side registries.
//!
//! ## Invariants Enforced
//!
//! - the active set is never empty and never exceeds the configured maximum
//! - every active validator holds at least the minimum stake
//! - basis-point voting power sums to at most 10_000 across active
//!   validators and is zero for inactive ones
//! - proposal arithmetic is `U256` over active stake; thresholds are crossed
//!   strictly, never on equality

pub mod errors;
pub mod proposals;
pub mod registry;
pub mod set;

pub use errors::GovernanceError;
pub use proposals::{ProposalBook, ProposalOutcome};
pub use registry::{FactionRegistry, Treasury};
pub use set::{GovernanceConfig, ValidatorSet};
