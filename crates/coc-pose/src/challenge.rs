//! # Challenge Factory and Quota
//!
//! Builds signed probes for the tracked targets. The quota caps how many
//! challenges of each type a challenger issues per epoch and enforces a
//! minimum interval between consecutive probes of one type against one
//! target.

use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use shared_crypto::{pose_challenge_message, NodeSigner};
use shared_types::{Challenge, ChallengeType, Hash32, QuerySpec};

use crate::errors::PoseError;

/// Per-type quota settings.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Challenges of one type per epoch.
    pub per_epoch: u32,
    /// Minimum interval between challenges of one type to one target.
    pub min_interval_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            per_epoch: 10,
            min_interval_ms: 30_000,
        }
    }
}

/// Tracks per-epoch counts and per-(target, type) last-issue times.
pub struct ChallengeQuota {
    config: QuotaConfig,
    epoch: Mutex<u64>,
    counts: Mutex<HashMap<ChallengeType, u32>>,
    last_issued: Mutex<HashMap<(String, ChallengeType), u64>>,
}

impl ChallengeQuota {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            epoch: Mutex::new(0),
            counts: Mutex::new(HashMap::new()),
            last_issued: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a slot for a challenge. Fails when the epoch cap or the
    /// per-target interval refuses it.
    pub fn reserve(
        &self,
        target: &str,
        challenge_type: ChallengeType,
        epoch: u64,
        now_ms: u64,
    ) -> Result<(), PoseError> {
        {
            let mut current = self.epoch.lock();
            if *current != epoch {
                *current = epoch;
                self.counts.lock().clear();
            }
        }
        {
            let counts = self.counts.lock();
            if counts.get(&challenge_type).copied().unwrap_or(0) >= self.config.per_epoch {
                return Err(PoseError::QuotaExhausted(challenge_type.tag()));
            }
        }
        {
            let last = self.last_issued.lock();
            if let Some(&at) = last.get(&(target.to_string(), challenge_type)) {
                if now_ms.saturating_sub(at) < self.config.min_interval_ms {
                    return Err(PoseError::QuotaExhausted(challenge_type.tag()));
                }
            }
        }
        *self
            .counts
            .lock()
            .entry(challenge_type)
            .or_insert(0) += 1;
        self.last_issued
            .lock()
            .insert((target.to_string(), challenge_type), now_ms);
        Ok(())
    }
}

/// Builds and signs challenges.
pub struct ChallengeFactory {
    challenger_id: String,
    /// How long a target has to answer.
    pub deadline_ms: u64,
}

impl ChallengeFactory {
    pub fn new(challenger_id: String, deadline_ms: u64) -> Self {
        Self {
            challenger_id,
            deadline_ms,
        }
    }

    /// Build a signed challenge of `challenge_type` for `target`.
    pub fn build(
        &self,
        signer: &NodeSigner,
        target: &str,
        challenge_type: ChallengeType,
        query_spec: QuerySpec,
        epoch_id: u64,
        now_ms: u64,
    ) -> Result<Challenge, PoseError> {
        let challenge_id = Uuid::new_v4().to_string();
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);

        let mut challenge = Challenge {
            challenge_id: challenge_id.clone(),
            epoch_id,
            node_id: target.to_lowercase(),
            challenge_type,
            nonce: Uuid::new_v4().to_string(),
            rand_seed: format!("0x{}", hex::encode(seed)),
            issued_at_ms: now_ms,
            deadline_ms: now_ms + self.deadline_ms,
            query_spec,
            challenger_id: self.challenger_id.clone(),
            challenger_sig: None,
        };
        let message = pose_challenge_message(&challenge_id, epoch_id, &challenge.node_id);
        challenge.challenger_sig = Some(
            signer
                .sign(&message)
                .map_err(|e| PoseError::Signature(e.to_string()))?,
        );
        debug!(
            id = %challenge.challenge_id,
            target = %challenge.node_id,
            kind = challenge_type.tag(),
            "challenge issued"
        );
        Ok(challenge)
    }

    /// Deterministic storage chunk selection from the seed.
    pub fn pick_chunk(rand_seed: &str, tree_size: u64) -> u64 {
        if tree_size == 0 {
            return 0;
        }
        let digest = shared_types::keccak256(rand_seed.as_bytes());
        u64::from_be_bytes(digest.0[..8].try_into().expect("8 bytes")) % tree_size
    }

    /// The pinned-root storage query for a tree.
    pub fn storage_query(root: Hash32, rand_seed: &str, tree_size: u64) -> QuerySpec {
        QuerySpec::Storage {
            root,
            chunk_index: Self::pick_chunk(rand_seed, tree_size),
            tree_size,
        }
    }
}
