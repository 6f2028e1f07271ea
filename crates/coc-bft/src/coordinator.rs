//! # Round State Machine
//!
//! One round at a time. Stake accumulates per phase; the quorum threshold
//! is `floor(2 * totalActiveStake / 3) + 1`. Equivocation (two different
//! hashes from one voter at one height) is reported to the anti-cheat sink
//! and wipes that voter's contribution for the round.

use primitive_types::U256;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use coc_governance::ValidatorSet;
use shared_types::{BftMessage, BftPhase, ChainBlock, Hash32};

use crate::errors::BftError;

/// Phase timeouts.
#[derive(Debug, Clone)]
pub struct BftConfig {
    pub prepare_timeout_ms: u64,
    pub commit_timeout_ms: u64,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: 10_000,
            commit_timeout_ms: 10_000,
        }
    }
}

/// Where the in-flight round stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Prepare,
    Commit,
    Finalized,
    Failed,
}

/// Receives equivocation reports; the node wires this to the evidence
/// journal and (optionally) a slash proposal.
pub trait EquivocationSink: Send + Sync {
    fn report(&self, voter: &str, height: u64, first: Hash32, second: Hash32);
}

/// What the caller must do after a handler ran.
#[derive(Debug, Clone)]
pub enum BftAction {
    /// Gossip this vote to the other validators.
    Broadcast(BftMessage),
    /// Quorum of commits reached: apply with `bft_finalized = true`.
    Finalize(Box<ChainBlock>),
    /// The round timed out and was cleared.
    RoundFailed { height: u64, phase: RoundPhase },
}

#[derive(Debug)]
struct Round {
    block: ChainBlock,
    phase: RoundPhase,
    phase_started_at_ms: u64,
    prepares: HashMap<String, Hash32>,
    commits: HashMap<String, Hash32>,
    discarded: HashSet<String>,
}

/// The coordinator owned by the consensus tick.
pub struct BftCoordinator {
    config: BftConfig,
    local_id: String,
    round: Option<Round>,
    sink: Option<Box<dyn EquivocationSink>>,
}

impl BftCoordinator {
    pub fn new(config: BftConfig, local_id: String) -> Self {
        Self {
            config,
            local_id,
            round: None,
            sink: None,
        }
    }

    /// Attach the anti-cheat sink.
    pub fn with_sink(mut self, sink: Box<dyn EquivocationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Quorum threshold over the current active stake.
    pub fn quorum_threshold(set: &ValidatorSet) -> U256 {
        set.total_active_stake() * U256::from(2u64) / U256::from(3u64) + U256::one()
    }

    pub fn current_phase(&self) -> Option<RoundPhase> {
        self.round.as_ref().map(|r| r.phase)
    }

    pub fn current_height(&self) -> Option<u64> {
        self.round.as_ref().map(|r| r.block.number)
    }

    /// Start a round for the proposed block. The local node votes its own
    /// prepare when it is an active validator.
    pub fn start_round(
        &mut self,
        block: ChainBlock,
        expected_height: u64,
        set: &ValidatorSet,
        now_ms: u64,
    ) -> Result<Vec<BftAction>, BftError> {
        if block.number != expected_height {
            return Err(BftError::WrongHeight {
                got: block.number,
                expected: expected_height,
            });
        }
        if let Some(round) = &self.round {
            if matches!(round.phase, RoundPhase::Prepare | RoundPhase::Commit) {
                return Err(BftError::RoundInFlight(round.block.number));
            }
        }

        let hash = block.hash;
        let height = block.number;
        let mut round = Round {
            block,
            phase: RoundPhase::Prepare,
            phase_started_at_ms: now_ms,
            prepares: HashMap::new(),
            commits: HashMap::new(),
            discarded: HashSet::new(),
        };

        let mut actions = Vec::new();
        if set.is_active(&self.local_id) {
            round.prepares.insert(self.local_id.clone(), hash);
            actions.push(BftAction::Broadcast(BftMessage {
                phase: BftPhase::Prepare,
                height,
                block_hash: hash,
                sender_id: self.local_id.clone(),
            }));
        }
        info!(height, hash = %hash, "bft round started");
        self.round = Some(round);

        // A single validator can be its own quorum.
        actions.extend(self.check_transitions(set, now_ms));
        Ok(actions)
    }

    /// Handle a prepare or commit vote from the wire.
    pub fn handle_message(
        &mut self,
        message: &BftMessage,
        set: &ValidatorSet,
        now_ms: u64,
    ) -> Vec<BftAction> {
        let Some(round) = self.round.as_mut() else {
            return Vec::new();
        };
        if message.height != round.block.number {
            debug!(
                got = message.height,
                expected = round.block.number,
                "dropping vote for other height"
            );
            return Vec::new();
        }
        if !matches!(round.phase, RoundPhase::Prepare | RoundPhase::Commit) {
            return Vec::new();
        }
        if !set.is_active(&message.sender_id) {
            debug!(sender = %message.sender_id, "dropping vote from non-validator");
            return Vec::new();
        }
        if round.discarded.contains(&message.sender_id) {
            return Vec::new();
        }

        let votes = match message.phase {
            BftPhase::Prepare => &mut round.prepares,
            BftPhase::Commit => &mut round.commits,
        };
        if let Some(&existing) = votes.get(&message.sender_id) {
            if existing == message.block_hash {
                // Duplicate identical vote: idempotent.
                return Vec::new();
            }
            // Equivocation: discard this voter for the whole round.
            warn!(
                voter = %message.sender_id,
                height = message.height,
                "equivocating vote"
            );
            round.prepares.remove(&message.sender_id);
            round.commits.remove(&message.sender_id);
            round.discarded.insert(message.sender_id.clone());
            if let Some(sink) = &self.sink {
                sink.report(&message.sender_id, message.height, existing, message.block_hash);
            }
            return Vec::new();
        }
        // Votes for a foreign hash are recorded (so a later flip is caught
        // as equivocation) but never contribute stake to this round.
        votes.insert(message.sender_id.clone(), message.block_hash);

        self.check_transitions(set, now_ms)
    }

    /// Drive timeouts. Called from the consensus tick.
    pub fn tick(&mut self, set: &ValidatorSet, now_ms: u64) -> Vec<BftAction> {
        let Some(round) = self.round.as_ref() else {
            return Vec::new();
        };
        let timeout = match round.phase {
            RoundPhase::Prepare => self.config.prepare_timeout_ms,
            RoundPhase::Commit => self.config.commit_timeout_ms,
            _ => return Vec::new(),
        };
        if now_ms.saturating_sub(round.phase_started_at_ms) > timeout {
            let height = round.block.number;
            let phase = round.phase;
            warn!(height, ?phase, "bft round timed out");
            self.round = None;
            return vec![BftAction::RoundFailed { height, phase }];
        }
        let _ = set;
        Vec::new()
    }

    /// Stake voted in the prepare phase (testing and metrics).
    pub fn prepare_stake(&self, set: &ValidatorSet) -> U256 {
        self.round
            .as_ref()
            .map(|r| Self::stake_of_votes(&r.prepares, r.block.hash, set))
            .unwrap_or_default()
    }

    /// Stake voted in the commit phase.
    pub fn commit_stake(&self, set: &ValidatorSet) -> U256 {
        self.round
            .as_ref()
            .map(|r| Self::stake_of_votes(&r.commits, r.block.hash, set))
            .unwrap_or_default()
    }

    fn stake_of_votes(
        votes: &HashMap<String, Hash32>,
        for_hash: Hash32,
        set: &ValidatorSet,
    ) -> U256 {
        votes
            .iter()
            .filter(|(_, &hash)| hash == for_hash)
            .fold(U256::zero(), |acc, (voter, _)| acc + set.stake_of(voter))
    }

    fn check_transitions(&mut self, set: &ValidatorSet, now_ms: u64) -> Vec<BftAction> {
        let quorum = Self::quorum_threshold(set);
        let Some(round) = self.round.as_mut() else {
            return Vec::new();
        };
        let mut actions = Vec::new();

        if round.phase == RoundPhase::Prepare
            && Self::stake_of_votes(&round.prepares, round.block.hash, set) >= quorum
        {
            round.phase = RoundPhase::Commit;
            round.phase_started_at_ms = now_ms;
            debug!(height = round.block.number, "prepare quorum reached");
            if set.is_active(&self.local_id) {
                round.commits.insert(self.local_id.clone(), round.block.hash);
                actions.push(BftAction::Broadcast(BftMessage {
                    phase: BftPhase::Commit,
                    height: round.block.number,
                    block_hash: round.block.hash,
                    sender_id: self.local_id.clone(),
                }));
            }
        }

        if round.phase == RoundPhase::Commit
            && Self::stake_of_votes(&round.commits, round.block.hash, set) >= quorum
        {
            round.phase = RoundPhase::Finalized;
            let mut block = round.block.clone();
            block.bft_finalized = true;
            info!(height = block.number, hash = %block.hash, "bft finalized");
            actions.push(BftAction::Finalize(Box::new(block)));
        }

        actions
    }
}
