//! # BFT Coordinator
//!
//! A stake-weighted two-phase commit over a single proposed block per
//! height: propose -> prepare -> commit -> finalized | failed.
//!
//! The coordinator is a pure state machine: handlers take the current
//! validator set and return the actions to perform (votes to broadcast, a
//! block to finalize), and the consensus tick executes them. Messages for
//! any height other than the in-flight round are dropped.

pub mod coordinator;
pub mod errors;

pub use coordinator::{BftAction, BftConfig, BftCoordinator, EquivocationSink, RoundPhase};
pub use errors::BftError;
