//! # Engine Hooks
//!
//! The node-side implementation of the gossip layer's [`NodeHooks`] seam.
//! Every entry point locks the engine (or the coordinator) for the
//! duration of one call, which is exactly the serialization the engine's
//! contract asks for.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use coc_bft::{BftAction, BftCoordinator};
use coc_chain::{ApplyOrigin, ChainEngine};
use coc_p2p::{Broadcaster, Discovery, NodeHooks};
use coc_telemetry::NodeMetrics;
use shared_types::{keccak256, to_stable_json, BftMessage, ChainBlock, ChainSnapshot, Hash32};

use crate::now_ms;

/// Window of recent blocks served in a chain snapshot.
const SNAPSHOT_WINDOW: u64 = 32;

/// Wires gossip ingress into the engine and the BFT coordinator.
pub struct EngineHooks {
    pub engine: Arc<Mutex<ChainEngine>>,
    pub bft: Arc<Mutex<BftCoordinator>>,
    pub broadcaster: Arc<Broadcaster>,
    pub discovery: Arc<Discovery>,
    pub metrics: Arc<NodeMetrics>,
    pub fanout_peers: usize,
}

impl EngineHooks {
    /// Execute coordinator actions: gossip votes, apply finalized blocks.
    pub fn run_bft_actions(&self, actions: Vec<BftAction>) {
        for action in actions {
            match action {
                BftAction::Broadcast(message) => {
                    self.gossip_bft(&message);
                }
                BftAction::Finalize(block) => {
                    NodeMetrics::bump(&self.metrics.bft_rounds_finalized);
                    let applied = {
                        let mut engine = self.engine.lock();
                        engine.apply_block(*block, ApplyOrigin::BftFinalize, now_ms())
                    };
                    match applied {
                        Ok(block) => {
                            NodeMetrics::bump(&self.metrics.blocks_applied);
                            info!(height = block.number, "bft-finalized block applied");
                            self.gossip_block(&block);
                        }
                        Err(e) => warn!(error = %e, "bft-finalized block failed to apply"),
                    }
                }
                BftAction::RoundFailed { height, phase } => {
                    NodeMetrics::bump(&self.metrics.bft_rounds_failed);
                    warn!(height, ?phase, "bft round failed");
                }
            }
        }
    }

    /// Gossip an applied block to the known peers.
    pub fn gossip_block(&self, block: &ChainBlock) {
        NodeMetrics::bump(&self.metrics.gossip_out);
        let peers = self.discovery.known_peers(self.fanout_peers);
        if peers.is_empty() {
            return;
        }
        let broadcaster = Arc::clone(&self.broadcaster);
        let payload = json!({ "block": block });
        let fingerprint = block.hash.to_hex();
        tokio::spawn(async move {
            broadcaster
                .broadcast(peers, "/p2p/gossip-block", payload, &fingerprint, now_ms())
                .await;
        });
    }

    fn gossip_bft(&self, message: &BftMessage) {
        NodeMetrics::bump(&self.metrics.gossip_out);
        let peers = self.discovery.known_peers(self.fanout_peers);
        if peers.is_empty() {
            return;
        }
        let broadcaster = Arc::clone(&self.broadcaster);
        let payload = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(_) => return,
        };
        let fingerprint = to_stable_json(message)
            .map(|s| keccak256(s.as_bytes()).to_hex())
            .unwrap_or_default();
        tokio::spawn(async move {
            broadcaster
                .broadcast(peers, "/p2p/bft-message", payload, &fingerprint, now_ms())
                .await;
        });
    }
}

impl NodeHooks for EngineHooks {
    fn receive_tx(&self, raw_tx: &str) -> Result<Hash32, String> {
        NodeMetrics::bump(&self.metrics.gossip_in);
        let result = self.engine.lock().add_raw_tx(raw_tx, now_ms());
        match result {
            Ok(hash) => {
                NodeMetrics::bump(&self.metrics.txs_admitted);
                Ok(hash)
            }
            Err(e) => {
                NodeMetrics::bump(&self.metrics.txs_rejected);
                Err(e.to_string())
            }
        }
    }

    fn receive_block(&self, block: ChainBlock) -> Result<bool, String> {
        NodeMetrics::bump(&self.metrics.gossip_in);
        let mut engine = self.engine.lock();
        match engine.index().has_block(&block.hash) {
            Ok(true) => return Ok(false),
            Ok(false) => {}
            Err(e) => return Err(e.to_string()),
        }
        match engine.apply_block(block, ApplyOrigin::Gossip, now_ms()) {
            Ok(applied) => {
                NodeMetrics::bump(&self.metrics.blocks_applied);
                debug!(height = applied.number, "gossip block applied");
                Ok(true)
            }
            Err(e) => {
                NodeMetrics::bump(&self.metrics.blocks_rejected);
                Err(e.to_string())
            }
        }
    }

    fn receive_bft(&self, message: BftMessage) -> Result<(), String> {
        NodeMetrics::bump(&self.metrics.gossip_in);
        // The coordinator reads stake from the current governance set; the
        // set is cloned so the engine lock is not held across vote handling.
        let Some(set) = self.engine.lock().governance().cloned() else {
            return Err("governance disabled".into());
        };
        let actions = self.bft.lock().handle_message(&message, &set, now_ms());
        self.run_bft_actions(actions);
        Ok(())
    }

    fn receive_pubsub(&self, topic: &str, _message: &Value) {
        debug!(topic, "pubsub message received");
    }

    fn chain_snapshot(&self) -> Option<ChainSnapshot> {
        self.engine
            .lock()
            .chain_snapshot(SNAPSHOT_WINDOW)
            .ok()
            .flatten()
    }

    fn state_snapshot(&self) -> Option<Value> {
        let snapshot = self.engine.lock().export_state_snapshot().ok().flatten()?;
        serde_json::to_value(snapshot).ok()
    }

    fn node_info(&self) -> Value {
        let engine = self.engine.lock();
        let (height, tip_hash) = match engine.tip() {
            Ok(Some(tip)) => (tip.number, Some(tip.hash)),
            _ => (0, None),
        };
        json!({
            "height": height,
            "tipHash": tip_hash,
            "mempool": engine.mempool().len(),
            "stats": self.metrics.snapshot(),
        })
    }
}
