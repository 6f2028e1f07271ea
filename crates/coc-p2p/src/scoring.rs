//! # Peer Reputation
//!
//! Scores start at 100 and clamp to [-100, 200]. Successes nudge up,
//! failures pull down, invalid data pulls hardest. Hitting zero bans the
//! peer for an exponentially growing window, capped at a day; while not
//! banned the score decays slowly back toward its initial value.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

/// What happened with a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreEvent {
    /// A request or broadcast succeeded: +2.
    Success,
    /// A general failure: -5.
    Failure,
    /// A timeout: -10.
    Timeout,
    /// Structurally invalid or dishonest data: -20.
    InvalidData,
}

impl ScoreEvent {
    fn delta(&self) -> i32 {
        match self {
            ScoreEvent::Success => 2,
            ScoreEvent::Failure => -5,
            ScoreEvent::Timeout => -10,
            ScoreEvent::InvalidData => -20,
        }
    }
}

/// Scoring bounds and ban policy.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub initial: i32,
    pub min: i32,
    pub max: i32,
    pub ban_base_ms: u64,
    pub ban_cap_ms: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            initial: 100,
            min: -100,
            max: 200,
            ban_base_ms: 60_000,
            ban_cap_ms: 86_400_000,
        }
    }
}

#[derive(Debug, Clone)]
struct PeerScore {
    score: i32,
    ban_count: u32,
    banned_until_ms: Option<u64>,
}

/// The per-peer reputation ledger.
pub struct PeerScoring {
    config: ScoringConfig,
    peers: Mutex<HashMap<String, PeerScore>>,
}

impl PeerScoring {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn score_of(&self, peer: &str) -> i32 {
        self.peers
            .lock()
            .get(peer)
            .map(|p| p.score)
            .unwrap_or(self.config.initial)
    }

    /// Apply an event; returns the new score.
    pub fn record(&self, peer: &str, event: ScoreEvent, now_ms: u64) -> i32 {
        let mut peers = self.peers.lock();
        let entry = peers.entry(peer.to_string()).or_insert(PeerScore {
            score: self.config.initial,
            ban_count: 0,
            banned_until_ms: None,
        });
        entry.score = (entry.score + event.delta()).clamp(self.config.min, self.config.max);

        if entry.score <= 0 && entry.banned_until_ms.map_or(true, |until| until <= now_ms) {
            entry.ban_count += 1;
            let exponent = (entry.ban_count - 1).min(10);
            let duration = self
                .config
                .ban_base_ms
                .saturating_mul(1u64 << exponent)
                .min(self.config.ban_cap_ms);
            entry.banned_until_ms = Some(now_ms + duration);
            // The score restarts so the peer can function once the ban lifts.
            entry.score = self.config.initial;
            warn!(peer, duration_ms = duration, count = entry.ban_count, "peer banned");
        }
        entry.score
    }

    pub fn is_banned(&self, peer: &str, now_ms: u64) -> bool {
        self.peers
            .lock()
            .get(peer)
            .and_then(|p| p.banned_until_ms)
            .map_or(false, |until| until > now_ms)
    }

    /// Slow drift toward the initial score for every unbanned peer; one
    /// point per tick.
    pub fn decay_tick(&self, now_ms: u64) {
        let mut peers = self.peers.lock();
        for entry in peers.values_mut() {
            let banned = entry.banned_until_ms.map_or(false, |until| until > now_ms);
            if banned {
                continue;
            }
            use std::cmp::Ordering;
            match entry.score.cmp(&self.config.initial) {
                Ordering::Less => entry.score += 1,
                Ordering::Greater => entry.score -= 1,
                Ordering::Equal => {}
            }
        }
    }

    /// Lift expired bans (housekeeping; `is_banned` already ignores them).
    pub fn prune(&self, now_ms: u64) {
        let mut peers = self.peers.lock();
        for entry in peers.values_mut() {
            if entry.banned_until_ms.map_or(false, |until| until <= now_ms) {
                entry.banned_until_ms = None;
                info!("ban expired");
            }
        }
    }
}

impl Default for PeerScoring {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}
