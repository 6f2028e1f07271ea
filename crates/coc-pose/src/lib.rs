//! # Proof-of-Service-Existence
//!
//! Periodic service probes and rolled-up result batches. Each epoch one
//! scheduled challenger probes the tracked nodes on three dimensions
//! (uptime, storage possession, relay) under per-type quotas; verified
//! receipts land in an append-only journal and flush into merkle-rooted
//! batches the scheduled aggregator submits on-chain.
//!
//! Correctness leans on the same signing and replay infrastructure as the
//! node core: every challenge and receipt is EIP-191 signed, and a
//! persistent nonce registry refuses replayed challenge tuples across
//! restarts.

pub mod agent;
pub mod batch;
pub mod challenge;
pub mod errors;
pub mod journal;
pub mod merkle;
pub mod scoring;
pub mod verify;

pub use agent::{L1Client, PoseAgent, PoseAgentConfig, PoseTransport, TargetNode};
pub use batch::build_batch;
pub use challenge::{ChallengeFactory, ChallengeQuota, QuotaConfig};
pub use errors::PoseError;
pub use journal::{EvidenceJournal, ReceiptJournal};
pub use merkle::{merkle_proof, merkle_root, verify_merkle_path};
pub use scoring::{EpochRewards, ServiceScoring};
pub use verify::{challenge_fingerprint, ReceiptVerifier, VerifyContext};
