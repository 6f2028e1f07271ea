//! # EVM Executor Port
//!
//! The engine consumes an external EVM through this seam: one transaction
//! in, a gas/status/log outcome out, state mutated through the store. The
//! built-in [`TransferEvm`] covers the permissioned chain's native needs
//! (value transfers, contract registration) and is what the tests run on.

use sha3::{Digest, Keccak256};

use coc_state::StateStore;
use shared_types::{Address, Hash32, RawTransaction};

use crate::errors::ChainError;

/// One log emitted during execution, before chain indexing.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Hash32>,
    /// `0x`-hex payload.
    pub data: String,
}

/// Result of executing a single transaction.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub gas_used: u64,
    /// 1 on success, 0 on revert.
    pub status: u8,
    pub logs: Vec<LogEntry>,
    /// The deployed contract address for CREATE transactions.
    pub created: Option<Address>,
}

/// The interface the chain engine consumes from the EVM.
pub trait EvmExecutor: Send + Sync {
    /// Execute `tx` from `sender` against `state`. Reverts are reported via
    /// `status`, not errors; an `Err` rejects the whole block.
    fn execute(
        &self,
        tx: &RawTransaction,
        sender: Address,
        state: &mut StateStore,
    ) -> Result<ExecOutcome, ChainError>;
}

/// Minimal built-in executor: nonce bookkeeping, value transfers, and
/// deterministic CREATE addresses. No bytecode interpretation.
#[derive(Debug, Default)]
pub struct TransferEvm;

const TRANSFER_GAS: u64 = 21_000;
const CREATE_GAS: u64 = 53_000;

impl TransferEvm {
    pub fn new() -> Self {
        Self
    }

    /// `keccak256(sender || nonce)[12..]`, the deployment address.
    fn create_address(sender: &Address, nonce: u64) -> Address {
        let mut hasher = Keccak256::new();
        hasher.update(sender.0);
        hasher.update(nonce.to_be_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }
}

impl EvmExecutor for TransferEvm {
    fn execute(
        &self,
        tx: &RawTransaction,
        sender: Address,
        state: &mut StateStore,
    ) -> Result<ExecOutcome, ChainError> {
        let sender_nonce = state.nonce_of(&sender);
        // The nonce advances whether or not the transfer lands, matching
        // receipt semantics where a reverted tx still consumes its slot.
        state.increment_nonce(sender);

        if tx.nonce != sender_nonce {
            return Ok(ExecOutcome {
                gas_used: TRANSFER_GAS,
                status: 0,
                logs: Vec::new(),
                created: None,
            });
        }

        if tx.is_create() {
            let created = Self::create_address(&sender, sender_nonce);
            let code_hex = tx.data.strip_prefix("0x").unwrap_or(&tx.data);
            let code = hex::decode(code_hex)
                .map_err(|e| ChainError::Decode(format!("init code: {e}")))?;
            let code_hash = state.put_code(&code)?;
            let mut account = state
                .get_account(&created)
                .cloned()
                .unwrap_or_else(shared_types::AccountState::empty);
            account.code_hash = code_hash;
            state.set_account(created, account);
            if !tx.value.is_zero() {
                if state.debit(sender, tx.value).is_err() {
                    return Ok(ExecOutcome {
                        gas_used: CREATE_GAS,
                        status: 0,
                        logs: Vec::new(),
                        created: None,
                    });
                }
                state.credit(created, tx.value);
            }
            return Ok(ExecOutcome {
                gas_used: CREATE_GAS,
                status: 1,
                logs: Vec::new(),
                created: Some(created),
            });
        }

        let recipient = tx.to.unwrap_or(Address::ZERO);
        let status = if tx.value.is_zero() {
            1
        } else if state.debit(sender, tx.value).is_ok() {
            state.credit(recipient, tx.value);
            1
        } else {
            0
        };
        Ok(ExecOutcome {
            gas_used: TRANSFER_GAS,
            status,
            logs: Vec::new(),
            created: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coc_storage::MemoryKv;
    use primitive_types::U256;
    use std::sync::Arc;

    fn state_with(addr: Address, balance: u64) -> StateStore {
        let mut state = StateStore::open(Arc::new(MemoryKv::new())).unwrap();
        state.credit(addr, U256::from(balance));
        state
    }

    fn transfer(nonce: u64, to: Address, value: u64) -> RawTransaction {
        RawTransaction {
            chain_id: 18_780,
            to: Some(to),
            nonce,
            value: U256::from(value),
            gas_limit: 21_000,
            gas_price: Some(U256::one()),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            data: "0x".into(),
            signature: None,
        }
    }

    #[test]
    fn successful_transfer_moves_value_and_nonce() {
        let sender = Address([1u8; 20]);
        let recipient = Address([2u8; 20]);
        let mut state = state_with(sender, 100);
        let outcome = TransferEvm::new()
            .execute(&transfer(0, recipient, 40), sender, &mut state)
            .unwrap();
        assert_eq!(outcome.status, 1);
        assert_eq!(state.balance_of(&sender), U256::from(60u64));
        assert_eq!(state.balance_of(&recipient), U256::from(40u64));
        assert_eq!(state.nonce_of(&sender), 1);
    }

    #[test]
    fn insufficient_balance_reverts_but_consumes_nonce() {
        let sender = Address([1u8; 20]);
        let mut state = state_with(sender, 10);
        let outcome = TransferEvm::new()
            .execute(&transfer(0, Address([2u8; 20]), 40), sender, &mut state)
            .unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(state.balance_of(&sender), U256::from(10u64));
        assert_eq!(state.nonce_of(&sender), 1);
    }

    #[test]
    fn wrong_nonce_reverts() {
        let sender = Address([1u8; 20]);
        let mut state = state_with(sender, 100);
        let outcome = TransferEvm::new()
            .execute(&transfer(5, Address([2u8; 20]), 1), sender, &mut state)
            .unwrap();
        assert_eq!(outcome.status, 0);
    }

    #[test]
    fn create_deploys_code_at_deterministic_address() {
        let sender = Address([1u8; 20]);
        let mut state = state_with(sender, 100);
        let mut tx = transfer(0, Address::ZERO, 0);
        tx.to = None;
        tx.data = "0x6080".into();
        let outcome = TransferEvm::new().execute(&tx, sender, &mut state).unwrap();
        let created = outcome.created.expect("created address");
        assert_eq!(created, TransferEvm::create_address(&sender, 0));
        let account = state.get_account(&created).unwrap();
        assert_eq!(
            state.get_code(&account.code_hash).unwrap(),
            Some(vec![0x60, 0x80])
        );
    }
}
