//! # Chain Engine
//!
//! Block production and application for the node core.
//!
//! The engine owns the mempool, the block index, the state store and the
//! event bus. Everything reaches it through sequential entry points: one
//! apply at a time (guarded), admission and packing behind the owner's
//! lock. The BFT coordinator, the gossip layer and the tick loops feed it
//! blocks and transactions; it feeds them events and chain snapshots.

pub mod engine;
pub mod errors;
pub mod evm;
pub mod fees;
pub mod fork_choice;
pub mod proposer;

pub use engine::{ApplyOrigin, ChainEngine, EngineConfig};
pub use errors::ChainError;
pub use evm::{EvmExecutor, ExecOutcome, LogEntry, TransferEvm};
pub use fees::{next_base_fee, INITIAL_BASE_FEE};
pub use fork_choice::{compare_forks, should_switch_fork, SwitchReason};
pub use proposer::expected_proposer;
