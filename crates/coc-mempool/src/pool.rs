//! # Pool Core
//!
//! Admission, replacement, eviction and block packing. The pool is a plain
//! struct; the owner serializes access (one mutex around admission and
//! packing keeps the three indexes consistent).

use primitive_types::U256;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use shared_crypto::recover_address;
use shared_types::{stable_stringify, Address, Hash32, MempoolTx, RawTransaction};

use crate::errors::MempoolError;

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Replay-protection chain id transactions must match.
    pub chain_id: u64,
    /// Global transaction cap.
    pub max_size: usize,
    /// Per-sender queue cap.
    pub max_per_sender: usize,
    /// Replacement must bid at least `old * (1 + bump/100)`.
    pub min_gas_bump_percent: u64,
    /// Admission floor in wei.
    pub min_gas_price: U256,
    /// Queued transactions older than this are dropped at packing time.
    pub ttl_ms: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            chain_id: 18_780,
            max_size: 10_000,
            max_per_sender: 64,
            min_gas_bump_percent: 10,
            min_gas_price: U256::one(),
            ttl_ms: 3_600_000,
        }
    }
}

/// The pending transaction pool.
#[derive(Debug)]
pub struct Mempool {
    config: MempoolConfig,
    by_hash: HashMap<Hash32, MempoolTx>,
    by_sender: HashMap<Address, BTreeSet<Hash32>>,
    by_sender_nonce: HashMap<(Address, u64), Hash32>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            by_hash: HashMap::new(),
            by_sender: HashMap::new(),
            by_sender_nonce: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash32) -> Option<&MempoolTx> {
        self.by_hash.get(hash)
    }

    /// Every queued transaction (histogram and diagnostics).
    pub fn iter(&self) -> impl Iterator<Item = &MempoolTx> {
        self.by_hash.values()
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Decode, validate and admit a raw signed transaction.
    pub fn admit(&mut self, raw: &str, now_ms: u64) -> Result<MempoolTx, MempoolError> {
        let tx = RawTransaction::decode(raw).map_err(|e| MempoolError::Decode(e.to_string()))?;
        if tx.chain_id != self.config.chain_id {
            return Err(MempoolError::ChainIdMismatch {
                got: tx.chain_id,
                expected: self.config.chain_id,
            });
        }
        let signature = tx.signature.as_deref().ok_or(MempoolError::MissingSignature)?;
        let payload = tx
            .signing_payload()
            .map_err(|e| MempoolError::Decode(e.to_string()))?;
        let sender = recover_address(&stable_stringify(&payload), signature)
            .map_err(|e| MempoolError::BadSignature(e.to_string()))?;

        let hash = tx
            .tx_hash()
            .map_err(|e| MempoolError::Decode(e.to_string()))?;
        let entry = MempoolTx {
            hash,
            raw: tx
                .encode_stable()
                .map_err(|e| MempoolError::Decode(e.to_string()))?,
            sender,
            nonce: tx.nonce,
            gas_price: tx.gas_price.unwrap_or_default(),
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
            gas_limit: tx.gas_limit,
            received_at_ms: now_ms,
        };
        self.insert(entry)
    }

    /// Admit an already-decoded entry. Exposed for the engine's re-queue
    /// path on fork switches.
    pub fn insert(&mut self, tx: MempoolTx) -> Result<MempoolTx, MempoolError> {
        if self.by_hash.contains_key(&tx.hash) {
            return Err(MempoolError::AlreadyKnown);
        }

        let bid = tx.bid_price();
        if bid < self.config.min_gas_price {
            return Err(MempoolError::GasPriceTooLow {
                price: bid,
                minimum: self.config.min_gas_price,
            });
        }

        let slot = (tx.sender, tx.nonce);
        let replacing = self.by_sender_nonce.get(&slot).copied();

        if let Some(old_hash) = replacing {
            let old = &self.by_hash[&old_hash];
            // required = old * (100 + bump) / 100, computed in U256.
            let required = old.bid_price() * U256::from(100 + self.config.min_gas_bump_percent)
                / U256::from(100);
            if bid < required {
                return Err(MempoolError::ReplacementUnderpriced);
            }
            self.remove(&old_hash);
            debug!(slot = ?slot, old = %old_hash, new = %tx.hash, "replaced pending tx");
        } else {
            let sender_count = self
                .by_sender
                .get(&tx.sender)
                .map(BTreeSet::len)
                .unwrap_or(0);
            if sender_count >= self.config.max_per_sender {
                return Err(MempoolError::SenderLimitReached {
                    limit: self.config.max_per_sender,
                });
            }
        }

        if self.by_hash.len() >= self.config.max_size {
            self.evict_cheaper_than(bid)?;
        }

        self.by_sender.entry(tx.sender).or_default().insert(tx.hash);
        self.by_sender_nonce.insert(slot, tx.hash);
        self.by_hash.insert(tx.hash, tx.clone());
        Ok(tx)
    }

    /// Remove a transaction from all three indexes.
    pub fn remove(&mut self, hash: &Hash32) -> Option<MempoolTx> {
        let tx = self.by_hash.remove(hash)?;
        if let Some(set) = self.by_sender.get_mut(&tx.sender) {
            set.remove(hash);
            if set.is_empty() {
                self.by_sender.remove(&tx.sender);
            }
        }
        // Only clear the slot if it still points at this tx (a replacement
        // may already have overwritten it).
        if self.by_sender_nonce.get(&(tx.sender, tx.nonce)) == Some(hash) {
            self.by_sender_nonce.remove(&(tx.sender, tx.nonce));
        }
        Some(tx)
    }

    /// Drop included transactions after a block lands.
    pub fn remove_all(&mut self, hashes: &[Hash32]) {
        for hash in hashes {
            self.remove(hash);
        }
    }

    /// Evict the cheapest queued transactions (oldest first on price ties)
    /// until one slot is free. Only transactions bidding strictly below the
    /// incoming bid may be evicted; otherwise the pool is genuinely full.
    fn evict_cheaper_than(&mut self, incoming_bid: U256) -> Result<(), MempoolError> {
        while self.by_hash.len() >= self.config.max_size {
            let victim = self
                .by_hash
                .values()
                .filter(|tx| tx.bid_price() < incoming_bid)
                .min_by(|a, b| {
                    a.bid_price()
                        .cmp(&b.bid_price())
                        .then(a.received_at_ms.cmp(&b.received_at_ms))
                })
                .map(|tx| tx.hash);
            match victim {
                Some(hash) => {
                    debug!(evicted = %hash, "mempool eviction");
                    self.remove(&hash);
                }
                None => return Err(MempoolError::PoolFull),
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Packing
    // -------------------------------------------------------------------------

    /// Select transactions for the next block.
    ///
    /// Drops TTL-expired entries, filters by effective price against the
    /// block's base fee, orders by (effective price desc, nonce asc, arrival
    /// asc) and then greedily includes per-sender nonce-contiguous
    /// transactions within the gas budget. `onchain_nonce` supplies each
    /// sender's expected next nonce.
    pub fn pick_for_block(
        &mut self,
        max_count: usize,
        min_gas_price: U256,
        base_fee: U256,
        block_gas_limit: u64,
        now_ms: u64,
        mut onchain_nonce: impl FnMut(&Address) -> u64,
    ) -> Vec<MempoolTx> {
        self.drop_expired(now_ms);

        let mut candidates: Vec<&MempoolTx> = self
            .by_hash
            .values()
            .filter(|tx| {
                // Fee-capped txs that cannot cover the base fee wait.
                if let Some(max_fee) = tx.max_fee_per_gas {
                    if max_fee < base_fee {
                        return false;
                    }
                }
                let effective = tx.effective_gas_price(base_fee);
                // The base fee floors every inclusion, legacy bids included.
                effective >= base_fee && effective >= min_gas_price
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.effective_gas_price(base_fee)
                .cmp(&a.effective_gas_price(base_fee))
                .then(a.nonce.cmp(&b.nonce))
                .then(a.received_at_ms.cmp(&b.received_at_ms))
        });

        let mut expected: HashMap<Address, u64> = HashMap::new();
        let mut gas_total: u64 = 0;
        let mut picked: Vec<MempoolTx> = Vec::new();

        // Two passes per sender are unnecessary: price-desc order plus the
        // nonce-asc tiebreak means a sender's eligible txs arrive in nonce
        // order whenever they bid equal prices, and a higher-priced later
        // nonce simply waits for the next block.
        for tx in candidates {
            if picked.len() >= max_count {
                break;
            }
            if gas_total.saturating_add(tx.gas_limit) > block_gas_limit {
                continue;
            }
            let next = expected
                .entry(tx.sender)
                .or_insert_with(|| onchain_nonce(&tx.sender));
            if tx.nonce != *next {
                continue;
            }
            *next += 1;
            gas_total += tx.gas_limit;
            picked.push(tx.clone());
        }
        picked
    }

    /// Smallest nonce `k >= onchain_nonce` with no queued transaction.
    pub fn pending_nonce(&self, sender: &Address, onchain_nonce: u64) -> u64 {
        let mut k = onchain_nonce;
        while self.by_sender_nonce.contains_key(&(*sender, k)) {
            k += 1;
        }
        k
    }

    fn drop_expired(&mut self, now_ms: u64) {
        if self.config.ttl_ms == 0 {
            return;
        }
        let expired: Vec<Hash32> = self
            .by_hash
            .values()
            .filter(|tx| now_ms.saturating_sub(tx.received_at_ms) > self.config.ttl_ms)
            .map(|tx| tx.hash)
            .collect();
        for hash in expired {
            debug!(expired = %hash, "mempool ttl expiry");
            self.remove(&hash);
        }
    }
}
