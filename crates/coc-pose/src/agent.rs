//! # Agent Tick
//!
//! The periodic probe loop. Each tick: refresh the L1 height (best
//! effort), refresh the cached registration status, flush a batch on
//! epoch rollover, and, when this node is the epoch's scheduled
//! challenger, probe every tracked target on each challenge type under
//! the quota. Network failures emit timeout evidence and fail the target
//! for the tick; verified receipts land in the journal and flush as a
//! batch once the threshold or the epoch boundary hits.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use coc_storage::PersistentNonceLog;
use shared_crypto::NodeSigner;
use shared_types::{
    epoch_of, Challenge, ChallengeType, EvidenceKind, EvidenceRecord, Hash32, PoseBatch,
    PoseReceipt, QuerySpec,
};

use crate::batch::build_batch;
use crate::challenge::{ChallengeFactory, ChallengeQuota, QuotaConfig};
use crate::errors::PoseError;
use crate::journal::{EvidenceJournal, ReceiptJournal};
use crate::scoring::ServiceScoring;
use crate::verify::{ReceiptVerifier, VerifyContext};

/// A node this agent probes.
#[derive(Debug, Clone)]
pub struct TargetNode {
    pub id: String,
    pub url: String,
    /// Pinned merkle root of the target's storage commitment, when known.
    pub storage_root: Option<Hash32>,
    pub storage_tree_size: u64,
}

/// Delivery of challenges to targets (the P2P layer in production).
#[async_trait]
pub trait PoseTransport: Send + Sync {
    /// POST the challenge and collect the target's receipt.
    async fn post_challenge(
        &self,
        target: &TargetNode,
        challenge: &Challenge,
    ) -> Result<PoseReceipt, PoseError>;
}

/// The external L1 / PoSe manager contract surface.
#[async_trait]
pub trait L1Client: Send + Sync {
    async fn latest_height(&self) -> Result<u64, PoseError>;
    async fn is_registered(&self, node_id: &str) -> Result<bool, PoseError>;
    async fn submit_batch(&self, batch: &PoseBatch) -> Result<(), PoseError>;
}

/// Agent tuning.
#[derive(Debug, Clone)]
pub struct PoseAgentConfig {
    pub epoch_ms: u64,
    /// Flush once this many receipts are pending.
    pub batch_size: usize,
    pub sample_size: usize,
    pub challenge_deadline_ms: u64,
    /// How long a registration answer stays cached.
    pub registration_cache_ms: u64,
    pub uptime_tolerance: u64,
    pub quota: QuotaConfig,
}

impl Default for PoseAgentConfig {
    fn default() -> Self {
        Self {
            epoch_ms: shared_types::DEFAULT_EPOCH_MS,
            batch_size: 5,
            sample_size: 2,
            challenge_deadline_ms: 30_000,
            registration_cache_ms: 300_000,
            uptime_tolerance: 3,
            quota: QuotaConfig::default(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub issued: usize,
    pub verified: usize,
    pub failed: usize,
    /// Receipts flushed into a batch this tick, if any.
    pub flushed: Option<usize>,
    /// True when the tick returned early (not registered / not challenger).
    pub skipped: bool,
}

/// The PoSe agent.
pub struct PoseAgent {
    config: PoseAgentConfig,
    signer: Arc<NodeSigner>,
    transport: Arc<dyn PoseTransport>,
    l1: Arc<dyn L1Client>,
    factory: ChallengeFactory,
    quota: ChallengeQuota,
    registry: PersistentNonceLog,
    receipts: ReceiptJournal,
    evidence: EvidenceJournal,
    pub scoring: ServiceScoring,
    /// Sorted ids eligible to act as challenger/aggregator.
    challenger_set: Vec<String>,
    targets: Mutex<Vec<TargetNode>>,
    cached_registration: Mutex<Option<(bool, u64)>>,
    last_seen_epoch: Mutex<Option<u64>>,
    latest_l1_height: Mutex<u64>,
}

impl PoseAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PoseAgentConfig,
        signer: Arc<NodeSigner>,
        transport: Arc<dyn PoseTransport>,
        l1: Arc<dyn L1Client>,
        registry: PersistentNonceLog,
        receipts: ReceiptJournal,
        evidence: EvidenceJournal,
        mut challenger_set: Vec<String>,
    ) -> Self {
        challenger_set = challenger_set
            .into_iter()
            .map(|id| id.to_lowercase())
            .collect();
        challenger_set.sort();
        challenger_set.dedup();
        let factory = ChallengeFactory::new(signer.node_id(), config.challenge_deadline_ms);
        let quota = ChallengeQuota::new(config.quota.clone());
        Self {
            config,
            signer,
            transport,
            l1,
            factory,
            quota,
            registry,
            receipts,
            evidence,
            scoring: ServiceScoring::new(),
            challenger_set,
            targets: Mutex::new(Vec::new()),
            cached_registration: Mutex::new(None),
            last_seen_epoch: Mutex::new(None),
            latest_l1_height: Mutex::new(0),
        }
    }

    pub fn set_targets(&self, targets: Vec<TargetNode>) {
        *self.targets.lock() = targets;
    }

    pub fn evidence(&self) -> &EvidenceJournal {
        &self.evidence
    }

    /// The epoch's scheduled challenger: round-robin over the sorted set.
    pub fn scheduled_challenger(&self, epoch: u64) -> Option<&str> {
        if self.challenger_set.is_empty() {
            return None;
        }
        let index = (epoch % self.challenger_set.len() as u64) as usize;
        self.challenger_set.get(index).map(String::as_str)
    }

    /// The epoch's scheduled aggregator (offset by one so the roles rotate
    /// independently).
    pub fn scheduled_aggregator(&self, epoch: u64) -> Option<&str> {
        if self.challenger_set.is_empty() {
            return None;
        }
        let index = ((epoch + 1) % self.challenger_set.len() as u64) as usize;
        self.challenger_set.get(index).map(String::as_str)
    }

    /// One agent tick.
    pub async fn tick(&self, now_ms: u64) -> Result<TickReport, PoseError> {
        let mut report = TickReport::default();
        let epoch = epoch_of(now_ms, self.config.epoch_ms);

        // 1. Refresh the L1 height, best effort.
        match self.l1.latest_height().await {
            Ok(height) => *self.latest_l1_height.lock() = height,
            Err(e) => debug!(error = %e, "l1 height refresh failed"),
        }

        // 2. Registration status, cached.
        if !self.registered(now_ms).await {
            report.skipped = true;
            return Ok(report);
        }

        // 3. Epoch rollover flushes whatever is pending.
        let rolled_over = {
            let mut last = self.last_seen_epoch.lock();
            let rolled = matches!(*last, Some(previous) if previous != epoch);
            let previous = *last;
            *last = Some(epoch);
            if rolled {
                previous
            } else {
                None
            }
        };
        if let Some(previous_epoch) = rolled_over {
            report.flushed = self.flush(previous_epoch, now_ms).await?;
            self.scoring.close_epoch(previous_epoch);
        }

        // 4. Challenger gate.
        let local_id = self.signer.node_id();
        if self.scheduled_challenger(epoch) != Some(local_id.as_str()) {
            report.skipped = true;
            return Ok(report);
        }

        // 5-9. Probe each target on each type under quota.
        let targets = self.targets.lock().clone();
        for target in &targets {
            let mut target_failed = false;
            for challenge_type in ChallengeType::ALL {
                if target_failed {
                    break;
                }
                let Some(query_spec) = self.query_for(target, challenge_type, epoch) else {
                    continue;
                };
                if self
                    .quota
                    .reserve(&target.id, challenge_type, epoch, now_ms)
                    .is_err()
                {
                    continue;
                }
                let challenge = self.factory.build(
                    &self.signer,
                    &target.id,
                    challenge_type,
                    query_spec,
                    epoch,
                    now_ms,
                )?;
                report.issued += 1;
                self.scoring.record_attempt(&target.id, challenge_type);

                let receipt = match self.transport.post_challenge(target, &challenge).await {
                    Ok(receipt) => receipt,
                    Err(e) => {
                        // 6. Network failure: timeout evidence, target is
                        // failed for this tick.
                        warn!(target = %target.id, error = %e, "challenge delivery failed");
                        self.record_evidence(
                            EvidenceKind::Timeout,
                            &target.id,
                            epoch,
                            now_ms,
                            &e.to_string(),
                        );
                        report.failed += 1;
                        target_failed = true;
                        continue;
                    }
                };

                match self.verify_receipt(&challenge, &receipt, now_ms) {
                    Ok(()) => {
                        self.receipts.append(&receipt)?;
                        self.scoring.record_success(&target.id, challenge_type);
                        if challenge_type == ChallengeType::Storage {
                            self.scoring
                                .record_storage_bytes(&target.id, chunk_bytes(&receipt));
                        }
                        report.verified += 1;
                    }
                    Err(e) => {
                        let kind = match &e {
                            PoseError::Replay => EvidenceKind::Replay,
                            PoseError::Signature(_) => EvidenceKind::BadSignature,
                            _ => EvidenceKind::BadProof,
                        };
                        self.record_evidence(kind, &target.id, epoch, now_ms, &e.to_string());
                        report.failed += 1;
                    }
                }
            }
        }

        // 10. Threshold flush.
        if self.receipts.len()? >= self.config.batch_size {
            report.flushed = self.flush(epoch, now_ms).await?;
        }
        Ok(report)
    }

    async fn registered(&self, now_ms: u64) -> bool {
        {
            let cached = self.cached_registration.lock();
            if let Some((registered, at)) = *cached {
                if now_ms.saturating_sub(at) < self.config.registration_cache_ms {
                    return registered;
                }
            }
        }
        let registered = match self.l1.is_registered(&self.signer.node_id()).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "registration check failed, assuming registered");
                true
            }
        };
        *self.cached_registration.lock() = Some((registered, now_ms));
        registered
    }

    fn query_for(
        &self,
        target: &TargetNode,
        challenge_type: ChallengeType,
        epoch: u64,
    ) -> Option<QuerySpec> {
        match challenge_type {
            ChallengeType::Uptime => Some(QuerySpec::Uptime {
                tolerance: self.config.uptime_tolerance,
            }),
            ChallengeType::Storage => {
                // Storage probes need the pinned root.
                let root = target.storage_root?;
                if target.storage_tree_size == 0 {
                    return None;
                }
                let seed = format!("{}:{}:{}", target.id, epoch, root.to_hex());
                Some(ChallengeFactory::storage_query(
                    root,
                    &seed,
                    target.storage_tree_size,
                ))
            }
            ChallengeType::Relay => Some(QuerySpec::Relay {
                route_tag: format!("route-{epoch}"),
            }),
        }
    }

    fn verify_receipt(
        &self,
        challenge: &Challenge,
        receipt: &PoseReceipt,
        now_ms: u64,
    ) -> Result<(), PoseError> {
        let ctx = VerifyContext {
            expected_height: *self.latest_l1_height.lock(),
            now_ms,
        };
        ReceiptVerifier::new(&self.registry).verify(challenge, receipt, &ctx)
    }

    fn record_evidence(
        &self,
        kind: EvidenceKind,
        subject: &str,
        epoch: u64,
        now_ms: u64,
        detail: &str,
    ) {
        let record = EvidenceRecord {
            kind,
            subject: subject.to_string(),
            epoch_id: epoch,
            recorded_at_ms: now_ms,
            detail: detail.to_string(),
        };
        if let Err(e) = self.evidence.append(&record) {
            warn!(error = %e, "evidence append failed");
        }
    }

    /// Drain the journal into a batch; submit when this node is the
    /// scheduled aggregator, otherwise log and move on.
    async fn flush(&self, epoch: u64, _now_ms: u64) -> Result<Option<usize>, PoseError> {
        let pending = self.receipts.drain()?;
        if pending.is_empty() {
            return Ok(None);
        }
        let batch = build_batch(epoch, &pending, self.config.sample_size)?;
        let local_id = self.signer.node_id();
        if self.scheduled_aggregator(epoch) == Some(local_id.as_str()) {
            self.l1.submit_batch(&batch).await?;
            info!(
                epoch,
                receipts = batch.receipt_count,
                root = %batch.merkle_root,
                "batch submitted"
            );
        } else {
            info!(
                epoch,
                receipts = batch.receipt_count,
                "batch built; another node aggregates this epoch"
            );
        }
        Ok(Some(pending.len()))
    }
}

fn chunk_bytes(receipt: &PoseReceipt) -> u64 {
    receipt
        .response_body
        .get("chunk")
        .and_then(serde_json::Value::as_str)
        .map(|hex_str| (hex_str.trim_start_matches("0x").len() / 2) as u64)
        .unwrap_or(0)
}
