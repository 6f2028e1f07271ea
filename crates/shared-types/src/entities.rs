//! # Core Domain Entities
//!
//! The chain, mempool, governance and networking types every subsystem
//! agrees on.
//!
//! ## Clusters
//!
//! - **Chain**: [`ChainBlock`], [`RawTransaction`], [`TxReceipt`], [`IndexedLog`]
//! - **Mempool**: [`MempoolTx`]
//! - **Governance & Consensus**: [`Validator`], [`Proposal`], [`BftMessage`]
//! - **State**: [`AccountState`]
//! - **Sync**: [`ChainSnapshot`], [`ForkTip`]

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::codec::{keccak256, stable_stringify, u256_dec, u256_dec_opt};
use crate::errors::CodecError;
use crate::hex32::{Address, Hash32};

// =============================================================================
// CLUSTER A: THE CHAIN
// =============================================================================

/// A block on the hash-linked chain.
///
/// The hash covers `{number, parentHash, proposer, timestampMs, txs,
/// baseFee?, cumulativeWeight?}` in stable JSON. The state root and the
/// proposer signature are recorded on the block but excluded from the
/// preimage, so a block's identity is fixed before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBlock {
    /// Height, starting at 1 for genesis.
    pub number: u64,
    /// Hash of the canonical preimage.
    pub hash: Hash32,
    /// Hash of the block at `number - 1`; all-zero for genesis.
    pub parent_hash: Hash32,
    /// Proposing validator's id.
    pub proposer: String,
    /// Proposal wall-clock time in milliseconds.
    pub timestamp_ms: u64,
    /// Raw signed transactions, each a stable-JSON string.
    pub txs: Vec<String>,
    /// EIP-1559 base fee for this block.
    #[serde(with = "u256_dec_opt", default, skip_serializing_if = "Option::is_none")]
    pub base_fee: Option<U256>,
    /// Gas consumed by executing `txs`.
    #[serde(default)]
    pub gas_used: u64,
    /// Running sum of proposer stakes (or the height when governance is off).
    #[serde(with = "u256_dec_opt", default, skip_serializing_if = "Option::is_none")]
    pub cumulative_weight: Option<U256>,
    /// State commitment after applying this block. Not part of the hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_root: Option<Hash32>,
    /// Set only by the local BFT finalize callback; never trusted from the wire.
    #[serde(default)]
    pub bft_finalized: bool,
    /// Depth-based finality, always computed locally.
    #[serde(default)]
    pub finalized: bool,
    /// Proposer's signature over `"block:" + hash`. Not part of the hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposer_signature: Option<String>,
}

impl ChainBlock {
    /// The canonical hash preimage as a JSON value.
    pub fn preimage(&self) -> Value {
        let mut obj = json!({
            "number": self.number,
            "parentHash": self.parent_hash.to_hex(),
            "proposer": self.proposer,
            "timestampMs": self.timestamp_ms,
            "txs": self.txs,
        });
        if let Some(base_fee) = self.base_fee {
            obj["baseFee"] = Value::String(base_fee.to_string());
        }
        if let Some(weight) = self.cumulative_weight {
            obj["cumulativeWeight"] = Value::String(weight.to_string());
        }
        obj
    }

    /// Recompute the hash from the canonical preimage.
    pub fn compute_hash(&self) -> Hash32 {
        keccak256(stable_stringify(&self.preimage()).as_bytes())
    }

    /// The tip summary fork choice compares.
    pub fn fork_tip(&self) -> ForkTip {
        ForkTip {
            height: self.number,
            hash: self.hash,
            cumulative_weight: self.cumulative_weight.unwrap_or_else(|| U256::from(self.number)),
            bft_finalized: self.bft_finalized,
        }
    }
}

/// A decoded signed transaction as carried in gossip and block bodies.
///
/// The raw wire form is a JSON string; decoding and re-encoding through the
/// stable codec makes the hash independent of the sender's formatting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    /// Replay-protection chain id.
    pub chain_id: u64,
    /// Recipient; `None` deploys a contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    /// Sender's account nonce.
    pub nonce: u64,
    /// Transferred value in wei.
    #[serde(with = "u256_dec")]
    pub value: U256,
    /// Gas ceiling for execution.
    pub gas_limit: u64,
    /// Legacy gas price; absent on fee-capped transactions.
    #[serde(with = "u256_dec_opt", default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    /// EIP-1559 fee cap.
    #[serde(with = "u256_dec_opt", default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    /// EIP-1559 priority fee.
    #[serde(with = "u256_dec_opt", default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    /// Call data / init code, `0x`-hex.
    #[serde(default)]
    pub data: String,
    /// 65-byte recoverable signature over the signing payload, `0x`-hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl RawTransaction {
    /// Decode a raw wire transaction.
    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The JSON payload the sender signs: every field except the signature.
    pub fn signing_payload(&self) -> Result<Value, CodecError> {
        let mut v = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut v {
            map.remove("signature");
        }
        Ok(v)
    }

    /// Stable rendering of the signed transaction; this is the form stored
    /// in block bodies.
    pub fn encode_stable(&self) -> Result<String, CodecError> {
        let v = serde_json::to_value(self)?;
        Ok(stable_stringify(&v))
    }

    /// Transaction identity: keccak of the stable rendering (signature
    /// included).
    pub fn tx_hash(&self) -> Result<Hash32, CodecError> {
        Ok(keccak256(self.encode_stable()?.as_bytes()))
    }

    /// True when this transaction deploys a contract.
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

/// Execution receipt for a single transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: Hash32,
    pub block_number: u64,
    pub block_hash: Hash32,
    pub from: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    pub gas_used: u64,
    /// 1 on success, 0 on revert.
    pub status: u8,
    #[serde(default)]
    pub logs: Vec<IndexedLog>,
}

/// A log entry indexed by its position in the chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexedLog {
    pub address: Address,
    pub topics: Vec<Hash32>,
    /// `0x`-hex payload.
    pub data: String,
    pub block_number: u64,
    pub block_hash: Hash32,
    pub tx_hash: Hash32,
    pub tx_index: u32,
    pub log_index: u32,
}

/// A log filter with standard Ethereum matching semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_block: Option<u64>,
    /// Match any of these addresses; empty matches all.
    #[serde(default)]
    pub addresses: Vec<Address>,
    /// Positional topic filters; `None` at a position matches anything.
    #[serde(default)]
    pub topics: Vec<Option<Hash32>>,
}

impl PendingFilter {
    /// Standard Ethereum log matching: address membership plus positional
    /// topic equality.
    pub fn matches(&self, log: &IndexedLog) -> bool {
        if let Some(from) = self.from_block {
            if log.block_number < from {
                return false;
            }
        }
        if let Some(to) = self.to_block {
            if log.block_number > to {
                return false;
            }
        }
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        for (i, want) in self.topics.iter().enumerate() {
            if let Some(want) = want {
                match log.topics.get(i) {
                    Some(have) if have == want => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

// =============================================================================
// CLUSTER B: MEMPOOL
// =============================================================================

/// A transaction admitted to the pending pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolTx {
    pub hash: Hash32,
    /// Stable-encoded raw transaction.
    pub raw: String,
    pub sender: Address,
    pub nonce: u64,
    /// Legacy price, or zero when fee-capped fields are present.
    #[serde(with = "u256_dec")]
    pub gas_price: U256,
    #[serde(with = "u256_dec_opt", default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(with = "u256_dec_opt", default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    pub gas_limit: u64,
    /// Local reception time, used for TTL expiry and ordering tiebreaks.
    pub received_at_ms: u64,
}

impl MempoolTx {
    /// Effective price at a given base fee: `min(maxFee, baseFee + tip)` for
    /// fee-capped transactions, the legacy price otherwise.
    pub fn effective_gas_price(&self, base_fee: U256) -> U256 {
        match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(max_fee), tip) => {
                let tip = tip.unwrap_or_default();
                let candidate = base_fee.saturating_add(tip);
                candidate.min(max_fee)
            }
            _ => self.gas_price,
        }
    }

    /// The price used for replacement and eviction comparisons (no base fee
    /// context): fee cap if present, legacy price otherwise.
    pub fn bid_price(&self) -> U256 {
        self.max_fee_per_gas.unwrap_or(self.gas_price)
    }
}

// =============================================================================
// CLUSTER C: GOVERNANCE & CONSENSUS
// =============================================================================

/// A validator eligible to propose and vote, weighted by stake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    pub id: String,
    pub address: Address,
    #[serde(with = "u256_dec")]
    pub stake: U256,
    pub joined_at_epoch: u64,
    pub active: bool,
    /// Basis points of total active stake; recomputed on every set change.
    pub voting_power: u32,
}

/// Kind of change a governance proposal requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    AddValidator,
    RemoveValidator,
    UpdateStake,
}

/// Lifecycle state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// A governance proposal with stake-weighted voting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub kind: ProposalKind,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_address: Option<Address>,
    #[serde(with = "u256_dec_opt", default, skip_serializing_if = "Option::is_none")]
    pub target_stake: Option<U256>,
    pub proposer_id: String,
    pub created_at_epoch: u64,
    pub expires_at_epoch: u64,
    /// Voter id -> approve. `BTreeMap` keeps the serialized form stable.
    #[serde(default)]
    pub votes: BTreeMap<String, bool>,
    pub status: ProposalStatus,
}

/// Phase of a BFT vote message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BftPhase {
    Prepare,
    Commit,
}

/// A prepare or commit vote gossiped between validators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BftMessage {
    #[serde(rename = "type")]
    pub phase: BftPhase,
    pub height: u64,
    pub block_hash: Hash32,
    pub sender_id: String,
}

// =============================================================================
// CLUSTER D: STATE
// =============================================================================

/// Account record stored in the state trie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub nonce: u64,
    #[serde(with = "u256_dec")]
    pub balance: U256,
    /// Root of the per-account storage sub-trie.
    pub storage_root: Hash32,
    /// Keccak of the account's code; the empty-code hash for EOAs.
    pub code_hash: Hash32,
}

impl AccountState {
    /// A fresh externally-owned account.
    pub fn empty() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            storage_root: EMPTY_TRIE_ROOT,
            code_hash: EMPTY_CODE_HASH,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance.is_zero()
            && self.storage_root == EMPTY_TRIE_ROOT
            && self.code_hash == EMPTY_CODE_HASH
    }
}

/// Root of an empty Merkle-Patricia trie (all-zero sentinel).
pub const EMPTY_TRIE_ROOT: Hash32 = Hash32([0u8; 32]);

/// keccak256 of empty code.
pub const EMPTY_CODE_HASH: Hash32 = Hash32([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
]);

// =============================================================================
// CLUSTER E: SYNC & FORK CHOICE
// =============================================================================

/// The tip summary fork choice compares layer by layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkTip {
    pub height: u64,
    pub hash: Hash32,
    #[serde(with = "u256_dec")]
    pub cumulative_weight: U256,
    pub bft_finalized: bool,
}

/// A chain snapshot served to peers: the tip plus a window of recent blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub height: u64,
    pub tip_hash: Hash32,
    pub tip: ForkTip,
    /// Most recent blocks, oldest first.
    pub blocks: Vec<ChainBlock>,
}
