//! # Broadcaster
//!
//! Fan-out to known peers with bounded concurrency and per-peer dedup.
//! A fingerprint is marked per peer at dispatch, so two broadcasts of the
//! same message can never race a duplicate delivery to one peer; delivery
//! results feed the reputation ledger.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::client::PeerClient;
use crate::discovery::PeerInfo;
use crate::scoring::{PeerScoring, ScoreEvent};
use crate::seen::SeenSet;

/// Concurrent peer deliveries per batch.
pub const BROADCAST_CONCURRENCY: usize = 5;

/// Per-peer dedup capacity (fingerprints remembered per broadcaster).
const DEDUP_CAPACITY: usize = 100_000;

/// The gossip egress fan-out.
pub struct Broadcaster {
    client: PeerClient,
    scoring: Arc<PeerScoring>,
    delivered: SeenSet,
    semaphore: Arc<Semaphore>,
}

impl Broadcaster {
    pub fn new(client: PeerClient, scoring: Arc<PeerScoring>, concurrency: usize) -> Self {
        Self {
            client,
            scoring,
            delivered: SeenSet::new(DEDUP_CAPACITY),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Deliver `payload` to every peer that has not seen `fingerprint`
    /// yet. Returns `(delivered, failed)` counts once the batch settles;
    /// callers that want fire-and-forget spawn this future.
    pub async fn broadcast(
        &self,
        peers: Vec<PeerInfo>,
        path: &str,
        payload: Value,
        fingerprint: &str,
        now_ms: u64,
    ) -> (usize, usize) {
        let mut handles = Vec::new();
        for peer in peers {
            if self.scoring.is_banned(&peer.id, now_ms) {
                continue;
            }
            // Claim the (peer, fingerprint) slot before dispatch; a second
            // broadcast of the same message skips this peer entirely.
            let key = format!("{}|{fingerprint}", peer.id);
            if !self.delivered.insert(&key) {
                continue;
            }

            let client = self.client.clone();
            let scoring = Arc::clone(&self.scoring);
            let semaphore = Arc::clone(&self.semaphore);
            let path = path.to_string();
            let payload = payload.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return false;
                };
                match client.post(&peer, &path, payload, now_ms).await {
                    Ok(_) => {
                        scoring.record(&peer.id, ScoreEvent::Success, now_ms);
                        true
                    }
                    Err(e) => {
                        let event = if e.to_string().contains("timed out") {
                            ScoreEvent::Timeout
                        } else {
                            ScoreEvent::Failure
                        };
                        debug!(peer = %peer.id, error = %e, "broadcast delivery failed");
                        scoring.record(&peer.id, event, now_ms);
                        false
                    }
                }
            }));
        }

        let mut delivered = 0usize;
        let mut failed = 0usize;
        for handle in handles {
            match handle.await {
                Ok(true) => delivered += 1,
                _ => failed += 1,
            }
        }
        (delivered, failed)
    }

    /// Whether a (peer, fingerprint) pair was already dispatched.
    pub fn already_delivered(&self, peer_id: &str, fingerprint: &str) -> bool {
        self.delivered.contains(&format!("{peer_id}|{fingerprint}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::NodeSigner;

    fn broadcaster() -> Broadcaster {
        let signer = Arc::new(NodeSigner::random());
        Broadcaster::new(
            PeerClient::new(signer, 200).unwrap(),
            Arc::new(PeerScoring::default()),
            BROADCAST_CONCURRENCY,
        )
    }

    fn unreachable_peer(byte: char) -> PeerInfo {
        PeerInfo {
            id: format!("0x{}", byte.to_string().repeat(40)),
            // TEST-NET-1 space: guaranteed unreachable, fails fast.
            url: "http://192.0.2.1:1".into(),
            added_at_ms: 0,
            verified: true,
        }
    }

    #[tokio::test]
    async fn failed_deliveries_score_down() {
        let b = broadcaster();
        let peer = unreachable_peer('a');
        let (delivered, failed) = b
            .broadcast(
                vec![peer.clone()],
                "/p2p/gossip-tx",
                serde_json::json!({"rawTx": "0x"}),
                "fp-1",
                0,
            )
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(failed, 1);
        assert!(b.scoring.score_of(&peer.id) < 100);
    }

    #[tokio::test]
    async fn same_fingerprint_is_not_redelivered() {
        let b = broadcaster();
        let peer = unreachable_peer('b');
        b.broadcast(
            vec![peer.clone()],
            "/p2p/gossip-tx",
            serde_json::json!({}),
            "fp-2",
            0,
        )
        .await;
        assert!(b.already_delivered(&peer.id, "fp-2"));
        let (delivered, failed) = b
            .broadcast(
                vec![peer],
                "/p2p/gossip-tx",
                serde_json::json!({}),
                "fp-2",
                0,
            )
            .await;
        assert_eq!(delivered + failed, 0);
    }

    #[tokio::test]
    async fn banned_peers_are_skipped() {
        let b = broadcaster();
        let peer = unreachable_peer('c');
        for _ in 0..5 {
            b.scoring.record(&peer.id, ScoreEvent::InvalidData, 0);
        }
        let (delivered, failed) = b
            .broadcast(
                vec![peer],
                "/p2p/gossip-tx",
                serde_json::json!({}),
                "fp-3",
                0,
            )
            .await;
        assert_eq!(delivered + failed, 0);
    }
}
