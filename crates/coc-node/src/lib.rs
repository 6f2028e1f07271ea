//! # Node Runtime
//!
//! Configuration, wiring and the tick loops that turn the subsystem
//! crates into a running node.

pub mod config;
pub mod hooks;
pub mod node;
pub mod ticks;

pub use config::{NodeConfig, OPTIONS};
pub use hooks::EngineHooks;
pub use node::Node;

/// Current wall clock in milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
