//! # Chain-of-Claw Test Suite
//!
//! Cross-crate integration scenarios: the end-to-end flows that no single
//! crate can cover alone. Unit tests live with their crates; everything
//! here wires at least two subsystems together.

#[cfg(test)]
pub mod integration;

#[cfg(test)]
pub mod support {
    //! Shared rig pieces for the integration scenarios.

    use primitive_types::U256;
    use std::sync::Arc;

    use coc_bus::EventBus;
    use coc_chain::{ChainEngine, EngineConfig, TransferEvm};
    use coc_governance::{GovernanceConfig, ValidatorSet};
    use coc_mempool::{Mempool, MempoolConfig};
    use coc_state::StateStore;
    use coc_storage::{BlockIndex, KvStore, MemoryKv};
    use shared_crypto::NodeSigner;
    use shared_types::{stable_stringify, Address, EnforcementMode, RawTransaction, Validator};

    pub const GWEI: u64 = 1_000_000_000;

    /// A single-node engine over in-memory storage.
    pub fn solo_engine(signer: NodeSigner) -> ChainEngine {
        let id = signer.node_id();
        engine_with(signer, vec![id], None, Vec::new())
    }

    pub fn engine_with(
        signer: NodeSigner,
        validators: Vec<String>,
        governance: Option<ValidatorSet>,
        prefunds: Vec<(Address, U256)>,
    ) -> ChainEngine {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let index = BlockIndex::new(Arc::clone(&kv));
        let state = StateStore::open(kv).unwrap();
        ChainEngine::new(
            EngineConfig {
                signature_mode: EnforcementMode::Monitor,
                validators,
                prefunds,
                ..Default::default()
            },
            index,
            state,
            Mempool::new(MempoolConfig::default()),
            governance,
            EventBus::default(),
            Box::new(TransferEvm::new()),
            signer,
        )
    }

    /// Three equal-stake validators, ids v1/v2/v3.
    pub fn three_validators() -> ValidatorSet {
        ValidatorSet::with_genesis(
            GovernanceConfig::default(),
            ["v1", "v2", "v3"]
                .iter()
                .map(|id| Validator {
                    id: id.to_string(),
                    address: Address([id.as_bytes()[1]; 20]),
                    stake: U256::from(100u64),
                    joined_at_epoch: 0,
                    active: true,
                    voting_power: 0,
                })
                .collect(),
        )
        .unwrap()
    }

    /// A signed transfer as the wire carries it.
    pub fn signed_transfer(
        signer: &NodeSigner,
        nonce: u64,
        value: u64,
        gas_price_wei: u64,
    ) -> String {
        let mut tx = RawTransaction {
            chain_id: 18_780,
            to: Some(Address([0x99; 20])),
            nonce,
            value: U256::from(value),
            gas_limit: 21_000,
            gas_price: Some(U256::from(gas_price_wei)),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            data: "0x".into(),
            signature: None,
        };
        let payload = tx.signing_payload().unwrap();
        tx.signature = Some(signer.sign(&stable_stringify(&payload)).unwrap());
        tx.encode_stable().unwrap()
    }
}
