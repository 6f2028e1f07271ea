//! # Telemetry
//!
//! Structured logging setup and the node's lightweight metrics counters.
//!
//! Logging goes through `tracing` with an env filter (`COC_LOG`, falling
//! back to `info`); metrics are plain atomics surfaced through
//! `/p2p/node-info`. Initialization is explicit: the binary calls
//! [`init_tracing`] once at startup, nothing happens at module load.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter.
pub const LOG_ENV: &str = "COC_LOG";

/// Environment variable switching to line-JSON output for log shippers.
pub const LOG_JSON_ENV: &str = "COC_LOG_JSON";

/// Install the global tracing subscriber. Safe to call once; a second
/// call reports failure without panicking (tests share a process).
pub fn init_tracing(default_level: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var(LOG_JSON_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    }
}

/// Counters the node exposes to peers and operators.
#[derive(Debug, Default)]
pub struct NodeMetrics {
    pub blocks_applied: AtomicU64,
    pub blocks_rejected: AtomicU64,
    pub txs_admitted: AtomicU64,
    pub txs_rejected: AtomicU64,
    pub gossip_in: AtomicU64,
    pub gossip_out: AtomicU64,
    pub peers_banned: AtomicU64,
    pub bft_rounds_finalized: AtomicU64,
    pub bft_rounds_failed: AtomicU64,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot for `/p2p/node-info`.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "blocksApplied": self.blocks_applied.load(Ordering::Relaxed),
            "blocksRejected": self.blocks_rejected.load(Ordering::Relaxed),
            "txsAdmitted": self.txs_admitted.load(Ordering::Relaxed),
            "txsRejected": self.txs_rejected.load(Ordering::Relaxed),
            "gossipIn": self.gossip_in.load(Ordering::Relaxed),
            "gossipOut": self.gossip_out.load(Ordering::Relaxed),
            "peersBanned": self.peers_banned.load(Ordering::Relaxed),
            "bftRoundsFinalized": self.bft_rounds_finalized.load(Ordering::Relaxed),
            "bftRoundsFailed": self.bft_rounds_failed.load(Ordering::Relaxed),
        })
    }
}
