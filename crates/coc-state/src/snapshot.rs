//! # State Snapshots
//!
//! Fast-sync state transfer: export the full flat state as one JSON
//! document, import it on the receiving side and verify the committed root.
//!
//! Import order is code first, then accounts, then per-account storage, so
//! a half-imported snapshot never leaves an account pointing at missing
//! code. A mismatched expected root rejects the whole import.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

use shared_types::{Address, Hash32};

use crate::errors::StateError;
use crate::store::StateStore;

/// Supported snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One account in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub address: Address,
    pub nonce: u64,
    /// Decimal string, as everywhere on the wire.
    pub balance: String,
    pub storage_root: Hash32,
    pub code_hash: Hash32,
    /// Slot -> `0x`-hex value.
    #[serde(default)]
    pub storage: BTreeMap<Hash32, String>,
    /// `0x`-hex bytecode; present only for contracts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A complete exported state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub version: u32,
    pub state_root: Hash32,
    pub block_height: u64,
    pub block_hash: Hash32,
    pub accounts: Vec<AccountSnapshot>,
}

impl StateSnapshot {
    /// Export the store's current state at a given chain position.
    pub fn export(
        store: &StateStore,
        block_height: u64,
        block_hash: Hash32,
    ) -> Result<Self, StateError> {
        let mut accounts = Vec::new();
        let mut addresses: Vec<Address> = store.addresses();
        addresses.sort();
        for address in addresses {
            let Some(state) = store.get_account(&address) else {
                continue;
            };
            let storage = store
                .storage_of(&address)
                .map(|slots| {
                    slots
                        .iter()
                        .map(|(slot, value)| (*slot, format!("0x{}", hex::encode(value))))
                        .collect()
                })
                .unwrap_or_default();
            let code = match store.get_code(&state.code_hash)? {
                Some(code) if !code.is_empty() => Some(format!("0x{}", hex::encode(code))),
                _ => None,
            };
            accounts.push(AccountSnapshot {
                address,
                nonce: state.nonce,
                balance: state.balance.to_string(),
                storage_root: state.storage_root,
                code_hash: state.code_hash,
                storage,
                code,
            });
        }
        Ok(Self {
            version: SNAPSHOT_VERSION,
            state_root: store.committed_root(),
            block_height,
            block_hash,
            accounts,
        })
    }

    /// Parse and structurally validate a received snapshot.
    pub fn deserialize(raw: &Value) -> Result<Self, StateError> {
        let version = raw
            .get("version")
            .and_then(Value::as_u64)
            .ok_or(StateError::SnapshotMissingField("version"))? as u32;
        if version != SNAPSHOT_VERSION {
            return Err(StateError::BadSnapshotVersion(version));
        }
        for field in ["stateRoot", "blockHeight", "blockHash", "accounts"] {
            if raw.get(field).is_none() {
                return Err(StateError::SnapshotMissingField(match field {
                    "stateRoot" => "stateRoot",
                    "blockHeight" => "blockHeight",
                    "blockHash" => "blockHash",
                    _ => "accounts",
                }));
            }
        }
        serde_json::from_value(raw.clone()).map_err(|e| StateError::Corrupt(e.to_string()))
    }

    /// Import into a store. When `expected_root` is supplied the commit must
    /// land exactly there or the import fails.
    pub fn import(
        &self,
        store: &mut StateStore,
        expected_root: Option<Hash32>,
    ) -> Result<Hash32, StateError> {
        use primitive_types::U256;
        use shared_types::AccountState;

        // Code first.
        for account in &self.accounts {
            if let Some(code_hex) = &account.code {
                let stripped = code_hex.strip_prefix("0x").unwrap_or(code_hex);
                let code =
                    hex::decode(stripped).map_err(|e| StateError::Corrupt(e.to_string()))?;
                store.put_code(&code)?;
            }
        }

        // Then accounts.
        for account in &self.accounts {
            let balance = U256::from_dec_str(&account.balance)
                .map_err(|e| StateError::Corrupt(format!("balance: {e:?}")))?;
            store.set_account(
                account.address,
                AccountState {
                    nonce: account.nonce,
                    balance,
                    storage_root: account.storage_root,
                    code_hash: account.code_hash,
                },
            );
        }

        // Then storage.
        for account in &self.accounts {
            for (slot, value_hex) in &account.storage {
                let stripped = value_hex.strip_prefix("0x").unwrap_or(value_hex);
                let value =
                    hex::decode(stripped).map_err(|e| StateError::Corrupt(e.to_string()))?;
                store.set_storage(account.address, *slot, value);
            }
        }

        let computed = store.commit()?;
        if let Some(expected) = expected_root {
            if computed != expected {
                return Err(StateError::RootMismatch {
                    expected: expected.to_hex(),
                    computed: computed.to_hex(),
                });
            }
        }
        info!(accounts = self.accounts.len(), root = %computed, "state snapshot imported");
        Ok(computed)
    }
}
