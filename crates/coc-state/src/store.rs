//! # State Store
//!
//! Flat account/storage/code records over the shared KV namespace, with the
//! Merkle-Patricia commitment rebuilt on every commit.
//!
//! Reads and writes hit the in-memory maps; `commit()` flushes dirty flat
//! records, rebuilds both trie levels (per-account storage sub-tries, then
//! the account trie), persists the node set and checkpoints the root under
//! `meta:stateRoot`. On open the flat records are loaded back, which lets
//! the chain engine validate the checkpoint instead of replaying blocks.

use primitive_types::U256;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use coc_storage::{keys, KvStore, WriteOp};
use shared_types::{keccak256, AccountState, Address, Hash32, EMPTY_CODE_HASH, EMPTY_TRIE_ROOT};

use crate::errors::StateError;
use crate::node::rlp_list;
use crate::trie::build_trie;

fn acct_key(address: &Address) -> Vec<u8> {
    format!("acct:{}", address.to_hex()).into_bytes()
}

fn storage_key(address: &Address, slot: &Hash32) -> Vec<u8> {
    format!("stg:{}:{}", address.to_hex(), slot.to_hex()).into_bytes()
}

fn storage_prefix(address: &Address) -> Vec<u8> {
    format!("stg:{}:", address.to_hex()).into_bytes()
}

/// Minimal big-endian rendering of a `U256` (empty for zero), as the
/// account value encoding wants.
fn minimal_be(value: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    let start = buf.iter().position(|&b| b != 0).unwrap_or(32);
    buf[start..].to_vec()
}

/// A point-in-time copy of the in-memory records, for rolling back a
/// failed block execution before anything was committed.
pub struct StateBackup {
    accounts: HashMap<Address, AccountState>,
    storage: HashMap<Address, BTreeMap<Hash32, Vec<u8>>>,
    dirty_accounts: HashSet<Address>,
    dirty_storage: HashSet<Address>,
}

/// The node's account state with a trie commitment.
pub struct StateStore {
    kv: Arc<dyn KvStore>,
    accounts: HashMap<Address, AccountState>,
    storage: HashMap<Address, BTreeMap<Hash32, Vec<u8>>>,
    dirty_accounts: HashSet<Address>,
    dirty_storage: HashSet<Address>,
    committed_root: Hash32,
}

impl StateStore {
    /// Open the store, loading every flat record from the KV namespace.
    pub fn open(kv: Arc<dyn KvStore>) -> Result<Self, StateError> {
        let mut accounts = HashMap::new();
        for (key, value) in kv.iter_prefix(b"acct:")? {
            let key_text = String::from_utf8_lossy(&key);
            let address = Address::from_hex(&key_text["acct:".len()..])
                .map_err(|e| StateError::Corrupt(e.to_string()))?;
            let state: AccountState = serde_json::from_slice(&value)
                .map_err(|e| StateError::Corrupt(format!("{key_text}: {e}")))?;
            accounts.insert(address, state);
        }

        let mut storage: HashMap<Address, BTreeMap<Hash32, Vec<u8>>> = HashMap::new();
        for (key, value) in kv.iter_prefix(b"stg:")? {
            let key_text = String::from_utf8_lossy(&key);
            let tail = &key_text["stg:".len()..];
            let Some((addr_part, slot_part)) = tail.split_once(':') else {
                continue;
            };
            let address = Address::from_hex(addr_part)
                .map_err(|e| StateError::Corrupt(e.to_string()))?;
            let slot =
                Hash32::from_hex(slot_part).map_err(|e| StateError::Corrupt(e.to_string()))?;
            storage.entry(address).or_default().insert(slot, value);
        }

        let committed_root = match kv.get(&keys::state_root_meta())? {
            Some(raw) => Hash32::from_hex(&String::from_utf8_lossy(&raw))
                .map_err(|e| StateError::Corrupt(e.to_string()))?,
            None => EMPTY_TRIE_ROOT,
        };

        debug!(accounts = accounts.len(), root = %committed_root, "state store opened");
        Ok(Self {
            kv,
            accounts,
            storage,
            dirty_accounts: HashSet::new(),
            dirty_storage: HashSet::new(),
            committed_root,
        })
    }

    /// The root recorded by the last commit.
    pub fn committed_root(&self) -> Hash32 {
        self.committed_root
    }

    /// Whether the persisted checkpoint matches the flat records.
    pub fn checkpoint_valid(&self) -> bool {
        self.compute_root() == self.committed_root
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Every known account address (snapshot export walks these sorted).
    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.keys().copied().collect()
    }

    /// Snapshot the in-memory records before speculative execution.
    pub fn backup(&self) -> StateBackup {
        StateBackup {
            accounts: self.accounts.clone(),
            storage: self.storage.clone(),
            dirty_accounts: self.dirty_accounts.clone(),
            dirty_storage: self.dirty_storage.clone(),
        }
    }

    /// Roll back to a backup taken before a failed execution.
    pub fn restore(&mut self, backup: StateBackup) {
        self.accounts = backup.accounts;
        self.storage = backup.storage;
        self.dirty_accounts = backup.dirty_accounts;
        self.dirty_storage = backup.dirty_storage;
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    pub fn get_account(&self, address: &Address) -> Option<&AccountState> {
        self.accounts.get(address)
    }

    /// Current nonce, zero for unknown accounts.
    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn balance_of(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    pub fn set_account(&mut self, address: Address, state: AccountState) {
        self.accounts.insert(address, state);
        self.dirty_accounts.insert(address);
    }

    pub fn credit(&mut self, address: Address, amount: U256) {
        let entry = self
            .accounts
            .entry(address)
            .or_insert_with(AccountState::empty);
        entry.balance = entry.balance.saturating_add(amount);
        self.dirty_accounts.insert(address);
    }

    pub fn debit(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let entry = self
            .accounts
            .entry(address)
            .or_insert_with(AccountState::empty);
        if entry.balance < amount {
            return Err(StateError::InsufficientBalance {
                address: address.to_hex(),
            });
        }
        entry.balance -= amount;
        self.dirty_accounts.insert(address);
        Ok(())
    }

    pub fn increment_nonce(&mut self, address: Address) {
        let entry = self
            .accounts
            .entry(address)
            .or_insert_with(AccountState::empty);
        entry.nonce += 1;
        self.dirty_accounts.insert(address);
    }

    /// Credit genesis balances to accounts that do not exist yet.
    pub fn apply_prefunds(&mut self, prefunds: &[(Address, U256)]) {
        for (address, amount) in prefunds {
            if !self.accounts.contains_key(address) {
                self.set_account(
                    *address,
                    AccountState {
                        balance: *amount,
                        ..AccountState::empty()
                    },
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Storage slots
    // -------------------------------------------------------------------------

    pub fn get_storage(&self, address: &Address, slot: &Hash32) -> Option<&Vec<u8>> {
        self.storage.get(address)?.get(slot)
    }

    pub fn set_storage(&mut self, address: Address, slot: Hash32, value: Vec<u8>) {
        let slots = self.storage.entry(address).or_default();
        if value.is_empty() {
            slots.remove(&slot);
        } else {
            slots.insert(slot, value);
        }
        self.dirty_storage.insert(address);
        // Storage roots live on the account record.
        self.dirty_accounts.insert(address);
    }

    pub fn storage_of(&self, address: &Address) -> Option<&BTreeMap<Hash32, Vec<u8>>> {
        self.storage.get(address)
    }

    // -------------------------------------------------------------------------
    // Code
    // -------------------------------------------------------------------------

    /// Store bytecode, returning its hash.
    pub fn put_code(&mut self, code: &[u8]) -> Result<Hash32, StateError> {
        if code.is_empty() {
            return Ok(EMPTY_CODE_HASH);
        }
        let hash = keccak256(code);
        self.kv.put(&keys::code(&hash), code)?;
        Ok(hash)
    }

    pub fn get_code(&self, hash: &Hash32) -> Result<Option<Vec<u8>>, StateError> {
        if *hash == EMPTY_CODE_HASH {
            return Ok(Some(Vec::new()));
        }
        Ok(self.kv.get(&keys::code(hash))?)
    }

    // -------------------------------------------------------------------------
    // Commit
    // -------------------------------------------------------------------------

    /// Rebuild the commitment, flush dirty records and checkpoint the root.
    pub fn commit(&mut self) -> Result<Hash32, StateError> {
        // Refresh storage roots for accounts whose slots changed.
        let dirty_storage: Vec<Address> = self.dirty_storage.drain().collect();
        for address in dirty_storage {
            let root = self.storage_root_of(&address);
            if let Some(account) = self.accounts.get_mut(&address) {
                account.storage_root = root;
            }
        }

        let (root, nodes) = {
            let entries = self.account_entries();
            build_trie(&entries)
        };

        let mut ops = Vec::new();
        for address in self.dirty_accounts.drain() {
            match self.accounts.get(&address) {
                Some(state) => {
                    let encoded = serde_json::to_vec(state)
                        .map_err(|e| StateError::Corrupt(e.to_string()))?;
                    ops.push(WriteOp::put(acct_key(&address), encoded));
                }
                None => ops.push(WriteOp::del(acct_key(&address))),
            }
            // Rewrite the account's slot records wholesale; deletions are
            // rare and the slot sets are small.
            if let Some(slots) = self.storage.get(&address) {
                for (slot, value) in slots {
                    ops.push(WriteOp::put(storage_key(&address, slot), value.clone()));
                }
            }
        }
        for (hash, node) in &nodes {
            ops.push(WriteOp::put(keys::trie_node(hash), node.rlp_encode()));
        }
        ops.push(WriteOp::put(
            keys::state_root_meta(),
            root.to_hex().into_bytes(),
        ));
        self.kv.batch(ops)?;

        self.committed_root = root;
        debug!(root = %root, accounts = self.accounts.len(), "state committed");
        Ok(root)
    }

    /// Compute the root from the in-memory records without persisting.
    pub fn compute_root(&self) -> Hash32 {
        let entries = self.account_entries();
        build_trie(&entries).0
    }

    fn storage_root_of(&self, address: &Address) -> Hash32 {
        let Some(slots) = self.storage.get(address) else {
            return EMPTY_TRIE_ROOT;
        };
        if slots.is_empty() {
            return EMPTY_TRIE_ROOT;
        }
        let entries: Vec<(Vec<u8>, Vec<u8>)> = slots
            .iter()
            .map(|(slot, value)| (keccak256(&slot.0).0.to_vec(), value.clone()))
            .collect();
        build_trie(&entries).0
    }

    fn account_entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.accounts
            .iter()
            .map(|(address, state)| {
                let value = rlp_list(&[
                    minimal_be(U256::from(state.nonce)),
                    minimal_be(state.balance),
                    state.storage_root.0.to_vec(),
                    state.code_hash.0.to_vec(),
                ]);
                (keccak256(&address.0).0.to_vec(), value)
            })
            .collect()
    }

    /// Fetch a persisted trie node (sync and debugging paths).
    pub fn trie_node(&self, hash: &Hash32) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.kv.get(&keys::trie_node(hash))?)
    }
}
