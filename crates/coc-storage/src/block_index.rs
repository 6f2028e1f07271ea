//! # Block Index
//!
//! The durable chain record: blocks by height and hash, the latest pointer,
//! per-height logs, transactions with receipts, address backlinks, the
//! contract registry and the confirmed-transaction nonce registry.
//!
//! History is never rewritten at an occupied height unless the caller
//! explicitly goes through [`BlockIndex::update_block`]; hash and
//! parent-link invariants are the chain engine's responsibility.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use shared_types::{Address, ChainBlock, Hash32, IndexedLog, TxReceipt};

use crate::errors::StorageError;
use crate::keys;
use crate::kv::{KvStore, WriteOp};

/// Raw transaction bytes plus the receipt produced by execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTx {
    pub raw: String,
    pub receipt: TxReceipt,
}

/// Contract deployment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub deploy_block: u64,
    pub deploy_tx: Hash32,
    pub deployer: Address,
}

/// The block/tx/log index over a shared [`KvStore`].
#[derive(Clone)]
pub struct BlockIndex {
    kv: Arc<dyn KvStore>,
}

impl BlockIndex {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// The underlying store, shared with the state trie.
    pub fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv)
    }

    // -------------------------------------------------------------------------
    // Blocks
    // -------------------------------------------------------------------------

    /// Write a block, its hash index and the latest pointer in one batch.
    ///
    /// Fails with [`StorageError::HeightOccupied`] if the height already
    /// holds a block; rewriting goes through [`Self::update_block`].
    pub fn put_block(&self, block: &ChainBlock) -> Result<(), StorageError> {
        if self.kv.exists(&keys::block(block.number))? {
            return Err(StorageError::HeightOccupied(block.number));
        }
        self.write_block(block)
    }

    /// Rewrite the block at an occupied height (finality flag upgrades,
    /// fork switches). The caller owns the decision.
    pub fn update_block(&self, block: &ChainBlock) -> Result<(), StorageError> {
        self.write_block(block)
    }

    fn write_block(&self, block: &ChainBlock) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(block)?;
        let mut ops = vec![
            WriteOp::put(keys::block(block.number), encoded.clone()),
            WriteOp::put(
                keys::height_of(&block.hash),
                block.number.to_string().into_bytes(),
            ),
        ];
        // Only advance the latest pointer forward.
        let is_latest = match self.latest_block()? {
            Some(latest) => block.number >= latest.number,
            None => true,
        };
        if is_latest {
            ops.push(WriteOp::put(keys::latest_block(), encoded));
        }
        self.kv.batch(ops)
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<ChainBlock>, StorageError> {
        self.read_json(&keys::block(height))
    }

    pub fn block_by_hash(&self, hash: &Hash32) -> Result<Option<ChainBlock>, StorageError> {
        match self.height_of(hash)? {
            Some(height) => self.block_by_height(height),
            None => Ok(None),
        }
    }

    pub fn height_of(&self, hash: &Hash32) -> Result<Option<u64>, StorageError> {
        let Some(raw) = self.kv.get(&keys::height_of(hash))? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&raw);
        text.parse::<u64>()
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: format!("h:{}", hash.to_hex()),
                reason: e.to_string(),
            })
    }

    pub fn latest_block(&self) -> Result<Option<ChainBlock>, StorageError> {
        self.read_json(&keys::latest_block())
    }

    pub fn has_block(&self, hash: &Hash32) -> Result<bool, StorageError> {
        self.kv.exists(&keys::height_of(hash))
    }

    // -------------------------------------------------------------------------
    // Logs
    // -------------------------------------------------------------------------

    pub fn put_logs(&self, height: u64, logs: &[IndexedLog]) -> Result<(), StorageError> {
        self.kv
            .put(&keys::logs(height), &serde_json::to_vec(logs)?)
    }

    pub fn logs_at(&self, height: u64) -> Result<Vec<IndexedLog>, StorageError> {
        Ok(self.read_json(&keys::logs(height))?.unwrap_or_default())
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    pub fn put_tx(&self, hash: &Hash32, stored: &StoredTx) -> Result<(), StorageError> {
        self.kv.put(&keys::tx(hash), &serde_json::to_vec(stored)?)
    }

    pub fn tx_by_hash(&self, hash: &Hash32) -> Result<Option<StoredTx>, StorageError> {
        self.read_json(&keys::tx(hash))
    }

    /// Backlink one transaction from its sender (and recipient) address.
    pub fn link_addr_tx(
        &self,
        address: &Address,
        height: u64,
        tx_index: u32,
        tx_hash: &Hash32,
    ) -> Result<(), StorageError> {
        self.kv.put(
            &keys::addr_tx(address, height, tx_index),
            tx_hash.to_hex().as_bytes(),
        )
    }

    /// All tx hashes touching an address, ordered by (height, txIndex).
    ///
    /// Keys carry plain decimal heights, so the lexicographic scan is
    /// re-sorted numerically here.
    pub fn txs_for_address(&self, address: &Address) -> Result<Vec<Hash32>, StorageError> {
        let prefix = keys::addr_tx_prefix(address);
        let mut entries: Vec<(u64, u32, Hash32)> = Vec::new();
        for (key, value) in self.kv.iter_prefix(&prefix)? {
            let key_text = String::from_utf8_lossy(&key);
            let tail = &key_text[String::from_utf8_lossy(&prefix).len()..];
            let mut parts = tail.split(':');
            let (Some(h), Some(i)) = (parts.next(), parts.next()) else {
                continue;
            };
            let (Ok(height), Ok(index)) = (h.parse::<u64>(), i.parse::<u32>()) else {
                continue;
            };
            let hash = Hash32::from_hex(&String::from_utf8_lossy(&value)).map_err(|e| {
                StorageError::Corrupt {
                    key: key_text.to_string(),
                    reason: e.to_string(),
                }
            })?;
            entries.push((height, index, hash));
        }
        entries.sort_by_key(|(h, i, _)| (*h, *i));
        Ok(entries.into_iter().map(|(_, _, hash)| hash).collect())
    }

    // -------------------------------------------------------------------------
    // Contracts
    // -------------------------------------------------------------------------

    pub fn register_contract(
        &self,
        address: &Address,
        info: &ContractInfo,
    ) -> Result<(), StorageError> {
        self.kv
            .put(&keys::contract(address), &serde_json::to_vec(info)?)
    }

    pub fn contract_info(&self, address: &Address) -> Result<Option<ContractInfo>, StorageError> {
        self.read_json(&keys::contract(address))
    }

    // -------------------------------------------------------------------------
    // Nonce registry (confirmed transactions)
    // -------------------------------------------------------------------------

    /// Mark a transaction hash as confirmed. Append-only.
    pub fn mark_tx_confirmed(&self, hash: &Hash32, timestamp_ms: u64) -> Result<(), StorageError> {
        self.kv
            .put(&keys::nonce(hash), timestamp_ms.to_string().as_bytes())
    }

    pub fn is_tx_confirmed(&self, hash: &Hash32) -> Result<bool, StorageError> {
        self.kv.exists(&keys::nonce(hash))
    }

    // -------------------------------------------------------------------------
    // State root checkpoint
    // -------------------------------------------------------------------------

    pub fn put_state_root(&self, root: &Hash32) -> Result<(), StorageError> {
        self.kv
            .put(&keys::state_root_meta(), root.to_hex().as_bytes())
    }

    pub fn state_root(&self) -> Result<Option<Hash32>, StorageError> {
        let Some(raw) = self.kv.get(&keys::state_root_meta())? else {
            return Ok(None);
        };
        Hash32::from_hex(&String::from_utf8_lossy(&raw))
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: "meta:stateRoot".into(),
                reason: e.to_string(),
            })
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &[u8],
    ) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.kv.get(key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: String::from_utf8_lossy(key).to_string(),
                reason: e.to_string(),
            })
    }
}
