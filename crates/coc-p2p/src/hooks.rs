//! # Node Hooks
//!
//! The seam between the gossip layer and the node core. Handlers parse a
//! request into a typed payload and hand it across this trait; the node
//! side serializes access to the engine internally. The gossip layer never
//! holds the engine directly, so a handler can never deadlock it.

use serde_json::Value;

use shared_types::{BftMessage, ChainBlock, ChainSnapshot, Hash32};

/// What the node core exposes to gossip ingress.
pub trait NodeHooks: Send + Sync {
    /// Admit a gossiped raw transaction. `Err` strings stay internal; the
    /// server maps them to a plain 400.
    fn receive_tx(&self, raw_tx: &str) -> Result<Hash32, String>;

    /// Apply a gossiped block. `Ok(true)` means newly applied (rebroadcast
    /// it), `Ok(false)` means already known, `Err` means invalid (score the
    /// sender down, never propagate).
    fn receive_block(&self, block: ChainBlock) -> Result<bool, String>;

    /// Feed a BFT vote to the coordinator.
    fn receive_bft(&self, message: BftMessage) -> Result<(), String>;

    /// Deliver an application pubsub message.
    fn receive_pubsub(&self, topic: &str, message: &Value);

    /// Current chain snapshot for peers.
    fn chain_snapshot(&self) -> Option<ChainSnapshot>;

    /// Exported state snapshot for fast sync.
    fn state_snapshot(&self) -> Option<Value>;

    /// Height, stats and protocol tag for `/p2p/node-info`.
    fn node_info(&self) -> Value;
}
