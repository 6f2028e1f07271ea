//! # Proof-of-Service-Existence Records
//!
//! Challenge, receipt and batch types for the PoSe probe pipeline. These
//! cross the P2P boundary (challenge/receipt endpoints) and feed the
//! aggregation batches, so they live with the shared entities.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hex32::Hash32;

/// The three service dimensions a node can be probed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    /// Uptime: respond with the current chain height.
    #[serde(rename = "U")]
    Uptime,
    /// Storage: prove possession of a chunk against a pinned merkle root.
    #[serde(rename = "S")]
    Storage,
    /// Relay: prove a message was routed within the latency bound.
    #[serde(rename = "R")]
    Relay,
}

impl ChallengeType {
    pub const ALL: [ChallengeType; 3] = [
        ChallengeType::Uptime,
        ChallengeType::Storage,
        ChallengeType::Relay,
    ];

    /// The single-letter wire tag.
    pub fn tag(&self) -> &'static str {
        match self {
            ChallengeType::Uptime => "U",
            ChallengeType::Storage => "S",
            ChallengeType::Relay => "R",
        }
    }
}

/// Challenge-type-specific query parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuerySpec {
    /// Height tolerance the responder must land within.
    Uptime { tolerance: u64 },
    /// The pinned merkle root and the chunk index to prove.
    Storage {
        root: Hash32,
        chunk_index: u64,
        tree_size: u64,
    },
    /// Route tag the relay witness must echo.
    Relay { route_tag: String },
}

/// A signed service probe issued by the epoch's challenger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub challenge_id: String,
    pub epoch_id: u64,
    /// The probed node.
    pub node_id: String,
    pub challenge_type: ChallengeType,
    /// Replay-protection nonce, unique per (challenger, node, type, epoch).
    pub nonce: String,
    /// Seed for deterministic chunk selection.
    pub rand_seed: String,
    pub issued_at_ms: u64,
    pub deadline_ms: u64,
    pub query_spec: QuerySpec,
    pub challenger_id: String,
    /// EIP-191 signature over the canonical challenge message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenger_sig: Option<String>,
}

/// A node's signed answer to a challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseReceipt {
    pub challenge_id: String,
    pub node_id: String,
    pub response_at_ms: u64,
    /// Challenge-specific response payload; hashed via the stable codec.
    pub response_body: Value,
    /// EIP-191 signature over the canonical receipt message.
    pub node_sig: String,
}

/// A merkle inclusion proof for one receipt in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptProof {
    pub leaf: Hash32,
    pub index: u64,
    /// Sibling hashes from leaf to root.
    pub path: Vec<Hash32>,
}

/// Verified receipts rolled up for on-chain submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseBatch {
    pub epoch_id: u64,
    /// Merkle root over the verified receipt hashes.
    pub merkle_root: Hash32,
    /// Hash of the batch summary (epoch, count, root).
    pub summary_hash: Hash32,
    /// A sample of inclusion proofs for spot checking.
    pub sample_proofs: Vec<ReceiptProof>,
    pub receipt_count: u64,
}

/// Why a probe failed; recorded in the evidence journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// The target never answered within the deadline.
    Timeout,
    /// A signature on the challenge or receipt did not recover.
    BadSignature,
    /// The challenge-specific result check failed.
    BadProof,
    /// A replayed (challenger, node, nonce, type, epoch) tuple.
    Replay,
    /// Conflicting BFT votes from one validator at one height.
    Equivocation,
}

/// One line of the append-only evidence journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRecord {
    pub kind: EvidenceKind,
    /// The accused node or validator.
    pub subject: String,
    pub epoch_id: u64,
    pub recorded_at_ms: u64,
    pub detail: String,
}
