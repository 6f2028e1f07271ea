//! # Service Scoring
//!
//! Per-node success ratios per challenge type plus verified storage
//! bytes. At epoch end the ratios fold into a reward weight that is
//! logged; actual payout lives behind the on-chain manager.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

use shared_types::ChallengeType;

#[derive(Debug, Clone, Default)]
struct TypeStats {
    attempts: u64,
    successes: u64,
}

#[derive(Debug, Clone, Default)]
struct NodeStats {
    by_type: HashMap<ChallengeType, TypeStats>,
    storage_bytes: u64,
}

/// One node's epoch summary.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochRewards {
    pub node_id: String,
    pub uptime_ratio: f64,
    pub storage_ratio: f64,
    pub relay_ratio: f64,
    pub storage_bytes: u64,
    /// Mean of the three ratios; the logged reward weight.
    pub weight: f64,
}

/// Accumulates probe outcomes for the current epoch.
#[derive(Default)]
pub struct ServiceScoring {
    nodes: Mutex<HashMap<String, NodeStats>>,
}

impl ServiceScoring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, node_id: &str, challenge_type: ChallengeType) {
        let mut nodes = self.nodes.lock();
        let stats = nodes
            .entry(node_id.to_lowercase())
            .or_default()
            .by_type
            .entry(challenge_type)
            .or_default();
        stats.attempts += 1;
    }

    pub fn record_success(&self, node_id: &str, challenge_type: ChallengeType) {
        let mut nodes = self.nodes.lock();
        let stats = nodes
            .entry(node_id.to_lowercase())
            .or_default()
            .by_type
            .entry(challenge_type)
            .or_default();
        stats.successes += 1;
    }

    /// Credit verified storage possession.
    pub fn record_storage_bytes(&self, node_id: &str, bytes: u64) {
        let mut nodes = self.nodes.lock();
        nodes.entry(node_id.to_lowercase()).or_default().storage_bytes += bytes;
    }

    fn ratio(stats: Option<&TypeStats>) -> f64 {
        match stats {
            Some(s) if s.attempts > 0 => s.successes as f64 / s.attempts as f64,
            _ => 0.0,
        }
    }

    /// Fold the epoch into per-node rewards, log them, and reset.
    pub fn close_epoch(&self, epoch_id: u64) -> Vec<EpochRewards> {
        let mut nodes = self.nodes.lock();
        let mut rewards: Vec<EpochRewards> = nodes
            .iter()
            .map(|(node_id, stats)| {
                let uptime = Self::ratio(stats.by_type.get(&ChallengeType::Uptime));
                let storage = Self::ratio(stats.by_type.get(&ChallengeType::Storage));
                let relay = Self::ratio(stats.by_type.get(&ChallengeType::Relay));
                EpochRewards {
                    node_id: node_id.clone(),
                    uptime_ratio: uptime,
                    storage_ratio: storage,
                    relay_ratio: relay,
                    storage_bytes: stats.storage_bytes,
                    weight: (uptime + storage + relay) / 3.0,
                }
            })
            .collect();
        rewards.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        for reward in &rewards {
            info!(
                epoch = epoch_id,
                node = %reward.node_id,
                uptime = reward.uptime_ratio,
                storage = reward.storage_ratio,
                relay = reward.relay_ratio,
                bytes = reward.storage_bytes,
                weight = reward.weight,
                "epoch rewards"
            );
        }
        nodes.clear();
        rewards
    }
}
