//! # Engine Core
//!
//! Proposal, validation, application, finality. One apply at a time; a
//! failed apply leaves no trace (state rolls back to the pre-apply
//! backup, nothing is persisted).
//!
//! Application order for a candidate block:
//!
//! 1. re-entrancy guard
//! 2. idempotent short-circuit for already-stored hashes (a trusted local
//!    BFT finalize may still upgrade the stored flag)
//! 3. parent/height link against the tip
//! 4. expected-proposer check
//! 5. timestamp window (non-local blocks only)
//! 6. cumulative weight against parent + proposer stake
//! 7. proposer signature per enforcement mode (local blocks skip)
//! 8. hash recompute from the canonical preimage
//! 9. execution, gas accounting, contract registration
//! 10. state commit; the root lands on the block
//! 11. persist + events + mempool cleanup + depth finality

use primitive_types::U256;
use tracing::{debug, info, warn};

use coc_bus::{ChainEvent, EventBus};
use coc_governance::ValidatorSet;
use coc_mempool::Mempool;
use coc_state::{StateSnapshot, StateStore};
use coc_storage::{BlockIndex, ContractInfo, StoredTx};
use shared_crypto::{block_message, recover_address, NodeSigner};
use shared_types::{
    stable_stringify, Address, ChainBlock, ChainSnapshot, EnforcementMode, Hash32, IndexedLog,
    PendingFilter, RawTransaction, TxReceipt, BLOCK_GAS_LIMIT,
};

use crate::errors::ChainError;
use crate::evm::EvmExecutor;
use crate::fees::{next_base_fee, INITIAL_BASE_FEE};
use crate::proposer::expected_proposer;

/// How far ahead of local wall clock a remote block's timestamp may sit.
const MAX_FUTURE_DRIFT_MS: u64 = 60_000;

/// How a block reached `apply_block`; decides which checks are skipped and
/// whether the finality flag may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrigin {
    /// Built by this node (proposal or deterministic genesis): signature and
    /// timestamp checks are skipped.
    LocalProposal,
    /// Received from a peer: every check runs.
    Gossip,
    /// The local BFT finalize callback: trusted, marks `bft_finalized`.
    BftFinalize,
}

/// Engine configuration distilled from the node's environment options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chain_id: u64,
    pub finality_depth: u64,
    pub max_txs_per_block: usize,
    pub min_gas_price: U256,
    pub signature_mode: EnforcementMode,
    /// Round-robin proposer ids when governance is off. With governance on,
    /// selection reads the active set instead.
    pub validators: Vec<String>,
    /// Genesis balances.
    pub prefunds: Vec<(Address, U256)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: 18_780,
            finality_depth: 3,
            max_txs_per_block: 50,
            min_gas_price: U256::one(),
            signature_mode: EnforcementMode::Enforce,
            validators: Vec::new(),
            prefunds: Vec::new(),
        }
    }
}

/// The chain engine. Owns mempool, block index, state store and event bus.
pub struct ChainEngine {
    config: EngineConfig,
    index: BlockIndex,
    state: StateStore,
    mempool: Mempool,
    governance: Option<ValidatorSet>,
    bus: EventBus,
    evm: Box<dyn EvmExecutor>,
    signer: NodeSigner,
    local_id: String,
    applying: bool,
}

impl ChainEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        index: BlockIndex,
        state: StateStore,
        mempool: Mempool,
        governance: Option<ValidatorSet>,
        bus: EventBus,
        evm: Box<dyn EvmExecutor>,
        signer: NodeSigner,
    ) -> Self {
        let local_id = signer.node_id();
        Self {
            config,
            index,
            state,
            mempool,
            governance,
            bus,
            evm,
            signer,
            local_id,
            applying: false,
        }
    }

    /// This node's validator id (its lowercase address).
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Override the validator id when it differs from the node address
    /// (named validators in a permissioned deployment).
    pub fn set_local_id(&mut self, id: String) {
        self.local_id = id;
    }

    pub fn governance(&self) -> Option<&ValidatorSet> {
        self.governance.as_ref()
    }

    pub fn governance_mut(&mut self) -> Option<&mut ValidatorSet> {
        self.governance.as_mut()
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn mempool_mut(&mut self) -> &mut Mempool {
        &mut self.mempool
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn tip(&self) -> Result<Option<ChainBlock>, ChainError> {
        Ok(self.index.latest_block()?)
    }

    // -------------------------------------------------------------------------
    // Init
    // -------------------------------------------------------------------------

    /// Bring the chain up: prefund genesis accounts, then either validate
    /// the persisted state checkpoint, replay blocks into a fresh state, or
    /// write the deterministic genesis on a fresh multi-validator network.
    pub fn init(&mut self, now_ms: u64) -> Result<(), ChainError> {
        self.state.apply_prefunds(&self.config.prefunds);

        match self.index.latest_block()? {
            None => {
                if self.validator_count() > 1 {
                    // All nodes must derive the same genesis hash, so the
                    // timestamp is pinned to zero.
                    let genesis = self.build_block(1, Hash32::ZERO, Vec::new(), 0)?;
                    info!(hash = %genesis.hash, "writing deterministic genesis");
                    self.apply_block(genesis, ApplyOrigin::LocalProposal, now_ms)?;
                } else {
                    // Single-validator network: the first propose tick
                    // writes block 1.
                    self.state.commit()?;
                }
            }
            Some(tip) => {
                if self.state.checkpoint_valid() {
                    debug!(height = tip.number, "state checkpoint valid, skipping replay");
                } else {
                    self.replay(tip.number)?;
                }
            }
        }
        Ok(())
    }

    fn replay(&mut self, tip_height: u64) -> Result<(), ChainError> {
        info!(tip_height, "replaying chain into fresh state");
        for height in 1..=tip_height {
            let block = self
                .index
                .block_by_height(height)?
                .ok_or_else(|| ChainError::Link(format!("missing block {height} in replay")))?;
            for raw in &block.txs {
                let tx = RawTransaction::decode(raw)
                    .map_err(|e| ChainError::Decode(e.to_string()))?;
                let sender = self.sender_of(&tx)?;
                self.evm.execute(&tx, sender, &mut self.state)?;
            }
        }
        self.state.commit()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Admit a raw transaction from RPC or gossip.
    pub fn add_raw_tx(&mut self, raw: &str, now_ms: u64) -> Result<Hash32, ChainError> {
        let decoded =
            RawTransaction::decode(raw).map_err(|e| ChainError::Decode(e.to_string()))?;
        let hash = decoded
            .tx_hash()
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        if self.index.is_tx_confirmed(&hash)? {
            return Err(ChainError::TxAlreadyConfirmed);
        }
        let admitted = self.mempool.admit(raw, now_ms)?;
        self.bus.publish(ChainEvent::PendingTx {
            hash: admitted.hash,
        });
        Ok(admitted.hash)
    }

    // -------------------------------------------------------------------------
    // Proposal
    // -------------------------------------------------------------------------

    /// Assemble (but do not apply) the next block if this node is the
    /// expected proposer. The BFT-wrapped propose path starts a round with
    /// this candidate and applies it on commit quorum.
    pub fn build_candidate_block(
        &mut self,
        now_ms: u64,
    ) -> Result<Option<ChainBlock>, ChainError> {
        let tip = self.index.latest_block()?;
        let height = tip.as_ref().map(|b| b.number + 1).unwrap_or(1);
        let parent_hash = tip.as_ref().map(|b| b.hash).unwrap_or(Hash32::ZERO);

        let expected = expected_proposer(height, self.governance.as_ref(), &self.config.validators);
        if expected.as_deref() != Some(self.local_id.as_str()) {
            return Ok(None);
        }

        // Strict monotonicity even if the wall clock stalled.
        let timestamp = match &tip {
            Some(parent) => now_ms.max(parent.timestamp_ms + 1),
            None => now_ms,
        };

        let base_fee = match &tip {
            Some(parent) => next_base_fee(
                parent.base_fee.unwrap_or_else(|| U256::from(INITIAL_BASE_FEE)),
                parent.gas_used,
            ),
            None => U256::from(INITIAL_BASE_FEE),
        };

        let picked = {
            let state = &self.state;
            self.mempool.pick_for_block(
                self.config.max_txs_per_block,
                self.config.min_gas_price,
                base_fee,
                BLOCK_GAS_LIMIT,
                now_ms,
                |sender| state.nonce_of(sender),
            )
        };
        let txs: Vec<String> = picked.into_iter().map(|tx| tx.raw).collect();

        Ok(Some(self.build_block(height, parent_hash, txs, timestamp)?))
    }

    /// Assemble a signed child of the current tip with an explicit
    /// timestamp. Production proposals go through
    /// [`Self::build_candidate_block`]; this variant serves sync tooling
    /// and scenario tests that need exact timestamps.
    pub fn build_block_at(
        &self,
        txs: Vec<String>,
        timestamp_ms: u64,
    ) -> Result<ChainBlock, ChainError> {
        let tip = self.index.latest_block()?;
        let height = tip.as_ref().map(|b| b.number + 1).unwrap_or(1);
        let parent_hash = tip.as_ref().map(|b| b.hash).unwrap_or(Hash32::ZERO);
        self.build_block(height, parent_hash, txs, timestamp_ms)
    }

    /// Build, sign and apply the next block if this node is the expected
    /// proposer. Returns `None` when it is another validator's turn.
    pub fn propose_next_block(&mut self, now_ms: u64) -> Result<Option<ChainBlock>, ChainError> {
        let Some(block) = self.build_candidate_block(now_ms)? else {
            return Ok(None);
        };
        let height = block.number;
        let parent_hash = block.parent_hash;
        let timestamp = block.timestamp_ms;
        match self.apply_block(block.clone(), ApplyOrigin::LocalProposal, now_ms) {
            Ok(applied) => Ok(Some(applied)),
            Err(e) => {
                // One fallback: an empty block at the same height keeps the
                // chain moving past a poisoned transaction batch.
                warn!(height, error = %e, "proposal failed, falling back to empty block");
                let empty = self.build_block(height, parent_hash, Vec::new(), timestamp)?;
                let applied = self.apply_block(empty, ApplyOrigin::LocalProposal, now_ms)?;
                Ok(Some(applied))
            }
        }
    }

    /// Assemble and sign a block at `height`. Weight and base fee are
    /// derived; the hash seals the preimage before signing.
    fn build_block(
        &self,
        height: u64,
        parent_hash: Hash32,
        txs: Vec<String>,
        timestamp_ms: u64,
    ) -> Result<ChainBlock, ChainError> {
        let parent = if height > 1 {
            self.index.block_by_height(height - 1)?
        } else {
            None
        };
        let proposer = expected_proposer(height, self.governance.as_ref(), &self.config.validators)
            .unwrap_or_else(|| self.local_id.clone());

        let base_fee = match &parent {
            Some(p) => next_base_fee(
                p.base_fee.unwrap_or_else(|| U256::from(INITIAL_BASE_FEE)),
                p.gas_used,
            ),
            None => U256::from(INITIAL_BASE_FEE),
        };
        let cumulative_weight = self.expected_weight(height, parent.as_ref(), &proposer);

        let mut block = ChainBlock {
            number: height,
            hash: Hash32::ZERO,
            parent_hash,
            proposer,
            timestamp_ms,
            txs,
            base_fee: Some(base_fee),
            gas_used: 0,
            cumulative_weight: Some(cumulative_weight),
            state_root: None,
            bft_finalized: false,
            finalized: false,
            proposer_signature: None,
        };
        block.hash = block.compute_hash();
        block.proposer_signature = Some(
            self.signer
                .sign(&block_message(&block.hash))
                .map_err(|e| ChainError::Signing(e.to_string()))?,
        );
        Ok(block)
    }

    fn expected_weight(&self, height: u64, parent: Option<&ChainBlock>, proposer: &str) -> U256 {
        match &self.governance {
            Some(set) => {
                let parent_weight = parent
                    .and_then(|p| p.cumulative_weight)
                    .unwrap_or_default();
                parent_weight + set.stake_of(proposer)
            }
            None => U256::from(height),
        }
    }

    fn validator_count(&self) -> usize {
        match &self.governance {
            Some(set) => set.active_count(),
            None => self.config.validators.len(),
        }
    }

    // -------------------------------------------------------------------------
    // Application
    // -------------------------------------------------------------------------

    /// Validate and apply one block. See the module header for the step
    /// order. Idempotent on re-apply of a stored hash.
    pub fn apply_block(
        &mut self,
        mut block: ChainBlock,
        origin: ApplyOrigin,
        now_ms: u64,
    ) -> Result<ChainBlock, ChainError> {
        if self.applying {
            return Err(ChainError::ApplyInFlight);
        }
        self.applying = true;
        let result = self.apply_block_inner(&mut block, origin, now_ms);
        self.applying = false;
        result.map(|()| block)
    }

    fn apply_block_inner(
        &mut self,
        block: &mut ChainBlock,
        origin: ApplyOrigin,
        now_ms: u64,
    ) -> Result<(), ChainError> {
        // Finality flags are computed locally, never trusted from the wire.
        block.finalized = false;
        if origin != ApplyOrigin::BftFinalize {
            block.bft_finalized = false;
        }

        // Idempotent short-circuit; a trusted finalize upgrades the flag.
        if self.index.has_block(&block.hash)? {
            if origin == ApplyOrigin::BftFinalize {
                if let Some(mut stored) = self.index.block_by_hash(&block.hash)? {
                    if !stored.bft_finalized {
                        stored.bft_finalized = true;
                        self.index.update_block(&stored)?;
                        info!(height = stored.number, "stored block upgraded to bft-finalized");
                    }
                    *block = stored;
                }
            }
            return Ok(());
        }

        let tip = self.index.latest_block()?;

        // Link validation.
        match &tip {
            Some(parent) => {
                if block.number != parent.number + 1 {
                    return Err(ChainError::Link(format!(
                        "height {} does not extend tip {}",
                        block.number, parent.number
                    )));
                }
                if block.parent_hash != parent.hash {
                    return Err(ChainError::Link("parent hash does not match tip".into()));
                }
            }
            None => {
                if block.number != 1 {
                    return Err(ChainError::Link(format!(
                        "first block must be height 1, got {}",
                        block.number
                    )));
                }
                if !block.parent_hash.is_zero() {
                    return Err(ChainError::Link("genesis parent must be zero".into()));
                }
            }
        }

        // Proposer check.
        let expected =
            expected_proposer(block.number, self.governance.as_ref(), &self.config.validators)
                .ok_or_else(|| ChainError::Link("no validators configured".into()))?;
        if block.proposer != expected {
            return Err(ChainError::WrongProposer {
                expected,
                got: block.proposer.clone(),
            });
        }

        // Timestamp window, non-local blocks only.
        if origin != ApplyOrigin::LocalProposal {
            if let Some(parent) = &tip {
                if block.timestamp_ms <= parent.timestamp_ms {
                    return Err(ChainError::Timestamp("must be after parent".into()));
                }
            }
            if block.timestamp_ms > now_ms + MAX_FUTURE_DRIFT_MS {
                return Err(ChainError::Timestamp("too far in future".into()));
            }
        }

        // Cumulative weight.
        let expected_weight = self.expected_weight(block.number, tip.as_ref(), &block.proposer);
        if block.cumulative_weight != Some(expected_weight) {
            return Err(ChainError::Weight {
                expected: expected_weight.to_string(),
                got: block
                    .cumulative_weight
                    .map(|w| w.to_string())
                    .unwrap_or_else(|| "none".into()),
            });
        }

        // Proposer signature per enforcement mode.
        if origin != ApplyOrigin::LocalProposal && !self.config.signature_mode.is_off() {
            if let Err(reason) = self.verify_proposer_signature(block) {
                if self.config.signature_mode.is_enforce() {
                    return Err(ChainError::Signature(reason));
                }
                warn!(height = block.number, reason, "proposer signature check failed (monitor)");
            }
        }

        // Hash recompute.
        if block.compute_hash() != block.hash {
            return Err(ChainError::Link("hash does not match preimage".into()));
        }

        // Execution against a rollback point.
        let backup = self.state.backup();
        match self.execute_block(block, origin) {
            Ok(artifacts) => {
                let root = self.state.commit()?;
                block.state_root = Some(root);
                self.persist_block(block, artifacts, now_ms)?;
                Ok(())
            }
            Err(e) => {
                self.state.restore(backup);
                Err(e)
            }
        }
    }

    fn verify_proposer_signature(&self, block: &ChainBlock) -> Result<(), String> {
        let signature = block
            .proposer_signature
            .as_deref()
            .ok_or_else(|| "missing proposer signature".to_string())?;
        let expected_address = self
            .proposer_address(&block.proposer)
            .ok_or_else(|| format!("no address for proposer {}", block.proposer))?;
        let recovered = recover_address(&block_message(&block.hash), signature)
            .map_err(|e| format!("recovery failed: {e}"))?;
        if recovered != expected_address {
            return Err(format!(
                "signer {recovered} is not proposer {expected_address}"
            ));
        }
        Ok(())
    }

    /// Resolve a proposer id to its signing address: governance record
    /// first, then the id itself when it is already an address.
    fn proposer_address(&self, proposer: &str) -> Option<Address> {
        if let Some(set) = &self.governance {
            if let Some(address) = set.address_of(proposer) {
                return Some(address);
            }
        }
        Address::from_hex(proposer).ok()
    }

    fn execute_block(
        &mut self,
        block: &mut ChainBlock,
        origin: ApplyOrigin,
    ) -> Result<BlockArtifacts, ChainError> {
        let claimed_gas = block.gas_used;
        let mut gas_total: u64 = 0;
        let mut receipts: Vec<(Hash32, StoredTx, Address, Option<Address>)> = Vec::new();
        let mut logs: Vec<IndexedLog> = Vec::new();
        let mut contracts: Vec<(Address, ContractInfo)> = Vec::new();
        let mut log_index: u32 = 0;

        for (tx_index, raw) in block.txs.iter().enumerate() {
            let tx =
                RawTransaction::decode(raw).map_err(|e| ChainError::Decode(e.to_string()))?;
            let sender = self.sender_of(&tx)?;
            let tx_hash = tx
                .tx_hash()
                .map_err(|e| ChainError::Decode(e.to_string()))?;

            let outcome = self.evm.execute(&tx, sender, &mut self.state)?;
            gas_total = gas_total.saturating_add(outcome.gas_used);
            if gas_total > BLOCK_GAS_LIMIT {
                return Err(ChainError::Gas(format!(
                    "block gas {gas_total} exceeds limit {BLOCK_GAS_LIMIT}"
                )));
            }

            let tx_logs: Vec<IndexedLog> = outcome
                .logs
                .into_iter()
                .map(|entry| {
                    let indexed = IndexedLog {
                        address: entry.address,
                        topics: entry.topics,
                        data: entry.data,
                        block_number: block.number,
                        block_hash: block.hash,
                        tx_hash,
                        tx_index: tx_index as u32,
                        log_index,
                    };
                    log_index += 1;
                    indexed
                })
                .collect();

            if let Some(created) = outcome.created {
                contracts.push((
                    created,
                    ContractInfo {
                        deploy_block: block.number,
                        deploy_tx: tx_hash,
                        deployer: sender,
                    },
                ));
            }

            let receipt = TxReceipt {
                tx_hash,
                block_number: block.number,
                block_hash: block.hash,
                from: sender,
                to: tx.to,
                gas_used: outcome.gas_used,
                status: outcome.status,
                logs: tx_logs.clone(),
            };
            logs.extend(tx_logs);
            receipts.push((
                tx_hash,
                StoredTx {
                    raw: raw.clone(),
                    receipt,
                },
                sender,
                tx.to,
            ));
        }

        // A remote block must claim exactly what execution computed; local
        // proposals have the derived value filled in here.
        if origin != ApplyOrigin::LocalProposal && claimed_gas != gas_total {
            return Err(ChainError::Gas(format!(
                "claimed gasUsed {claimed_gas} disagrees with computed {gas_total}"
            )));
        }
        block.gas_used = gas_total;

        Ok(BlockArtifacts {
            receipts,
            logs,
            contracts,
        })
    }

    fn sender_of(&self, tx: &RawTransaction) -> Result<Address, ChainError> {
        let signature = tx
            .signature
            .as_deref()
            .ok_or_else(|| ChainError::Decode("unsigned tx in block".into()))?;
        let payload = tx
            .signing_payload()
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        recover_address(&stable_stringify(&payload), signature)
            .map_err(|e| ChainError::Decode(format!("sender recovery: {e}")))
    }

    fn persist_block(
        &mut self,
        block: &mut ChainBlock,
        artifacts: BlockArtifacts,
        now_ms: u64,
    ) -> Result<(), ChainError> {
        self.index.put_block(block)?;
        self.index.put_logs(block.number, &artifacts.logs)?;

        let mut included: Vec<Hash32> = Vec::with_capacity(artifacts.receipts.len());
        for (tx_index, (tx_hash, stored, sender, recipient)) in
            artifacts.receipts.into_iter().enumerate()
        {
            self.index.put_tx(&tx_hash, &stored)?;
            self.index
                .link_addr_tx(&sender, block.number, tx_index as u32, &tx_hash)?;
            if let Some(to) = recipient {
                self.index
                    .link_addr_tx(&to, block.number, tx_index as u32, &tx_hash)?;
            }
            self.index.mark_tx_confirmed(&tx_hash, now_ms)?;
            included.push(tx_hash);
        }
        for (address, info) in &artifacts.contracts {
            self.index.register_contract(address, info)?;
        }

        // New-block strictly before that block's logs.
        self.bus.publish(ChainEvent::NewBlock(Box::new(block.clone())));
        for log in artifacts.logs {
            self.bus.publish(ChainEvent::Log(Box::new(log)));
        }
        self.mempool.remove_all(&included);

        self.advance_finality(block.number)?;
        info!(
            height = block.number,
            hash = %block.hash,
            txs = included.len(),
            gas = block.gas_used,
            "block applied"
        );
        Ok(())
    }

    /// Depth finality touches exactly one block per apply: the one at
    /// `tip - finality_depth` (earlier blocks were finalized by earlier
    /// applies).
    fn advance_finality(&mut self, tip_height: u64) -> Result<(), ChainError> {
        if tip_height <= self.config.finality_depth {
            return Ok(());
        }
        let target = tip_height - self.config.finality_depth;
        if let Some(mut block) = self.index.block_by_height(target)? {
            if !block.finalized {
                block.finalized = true;
                self.index.update_block(&block)?;
                self.bus.publish(ChainEvent::Finalized {
                    height: block.number,
                    hash: block.hash,
                });
                debug!(height = target, "depth finality reached");
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sync
    // -------------------------------------------------------------------------

    /// Logs matching a filter over the indexed range.
    pub fn logs_matching(&self, filter: &PendingFilter) -> Result<Vec<IndexedLog>, ChainError> {
        let Some(tip) = self.index.latest_block()? else {
            return Ok(Vec::new());
        };
        let from = filter.from_block.unwrap_or(1).max(1);
        let to = filter.to_block.unwrap_or(tip.number).min(tip.number);
        let mut matched = Vec::new();
        for height in from..=to {
            for log in self.index.logs_at(height)? {
                if filter.matches(&log) {
                    matched.push(log);
                }
            }
        }
        Ok(matched)
    }

    /// Current snapshot for peers: the tip plus a short window of blocks.
    pub fn chain_snapshot(&self, window: u64) -> Result<Option<ChainSnapshot>, ChainError> {
        let Some(tip) = self.index.latest_block()? else {
            return Ok(None);
        };
        let from = tip.number.saturating_sub(window.saturating_sub(1)).max(1);
        let mut blocks = Vec::with_capacity((tip.number - from + 1) as usize);
        for height in from..=tip.number {
            if let Some(block) = self.index.block_by_height(height)? {
                blocks.push(block);
            }
        }
        Ok(Some(ChainSnapshot {
            height: tip.number,
            tip_hash: tip.hash,
            tip: tip.fork_tip(),
            blocks,
        }))
    }

    /// Incrementally adopt a peer's snapshot: the incoming window must rise
    /// above our tip, hold together internally, and its first block must
    /// link to our tip. Every block goes through the normal apply path.
    pub fn maybe_adopt_snapshot(
        &mut self,
        blocks: &[ChainBlock],
        now_ms: u64,
    ) -> Result<usize, ChainError> {
        let Some(incoming_tip) = blocks.last() else {
            return Ok(0);
        };
        let local_tip = self.index.latest_block()?;
        let local_height = local_tip.as_ref().map(|b| b.number).unwrap_or(0);
        if incoming_tip.number <= local_height {
            return Ok(0);
        }
        Self::validate_internal_integrity(blocks)?;

        let mut applied = 0usize;
        for block in blocks {
            if block.number <= local_height {
                continue;
            }
            self.apply_block(block.clone(), ApplyOrigin::Gossip, now_ms)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Append-only fast-sync jump after a state snapshot import. Only the
    /// window's internal integrity is validated (the historical proposer
    /// set may differ from today's); transactions are not re-executed.
    /// Finality flags are derived locally from depth.
    pub fn import_snap_sync_blocks(
        &mut self,
        blocks: &[ChainBlock],
        expected_state_root: Option<Hash32>,
    ) -> Result<usize, ChainError> {
        if blocks.is_empty() {
            return Ok(0);
        }
        Self::validate_internal_integrity(blocks)?;

        let local_height = self
            .index
            .latest_block()?
            .map(|b| b.number)
            .unwrap_or(0);
        if blocks[0].number <= local_height {
            return Err(ChainError::Snapshot(format!(
                "snap blocks start at {}, tip is {local_height}",
                blocks[0].number
            )));
        }
        if let Some(expected) = expected_state_root {
            if self.state.committed_root() != expected {
                return Err(ChainError::Snapshot(
                    "state root does not match imported snapshot".into(),
                ));
            }
        }

        let tip_height = blocks.last().map(|b| b.number).unwrap_or(0);
        for block in blocks {
            let mut block = block.clone();
            // Remote finality flags are never trusted.
            block.bft_finalized = false;
            block.finalized =
                tip_height.saturating_sub(block.number) >= self.config.finality_depth;
            self.index.put_block(&block)?;
            for raw in &block.txs {
                if let Ok(tx) = RawTransaction::decode(raw) {
                    if let Ok(hash) = tx.tx_hash() {
                        self.index.mark_tx_confirmed(&hash, block.timestamp_ms)?;
                    }
                }
            }
        }
        info!(count = blocks.len(), tip = tip_height, "snap-sync blocks imported");
        Ok(blocks.len())
    }

    /// Hash, parent-link and timestamp checks inside a block window.
    fn validate_internal_integrity(blocks: &[ChainBlock]) -> Result<(), ChainError> {
        for (i, block) in blocks.iter().enumerate() {
            if block.compute_hash() != block.hash {
                return Err(ChainError::Link(format!(
                    "block {} hash does not match preimage",
                    block.number
                )));
            }
            if i > 0 {
                let prev = &blocks[i - 1];
                if block.number != prev.number + 1 {
                    return Err(ChainError::Link("non-contiguous snapshot heights".into()));
                }
                if block.parent_hash != prev.hash {
                    return Err(ChainError::Link("broken parent link in snapshot".into()));
                }
                if block.timestamp_ms <= prev.timestamp_ms {
                    return Err(ChainError::Timestamp(
                        "non-monotonic timestamps in snapshot".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Import a peer's state snapshot ahead of a snap-sync block jump.
    pub fn import_state_snapshot(&mut self, snapshot: &StateSnapshot) -> Result<Hash32, ChainError> {
        let root = snapshot.import(&mut self.state, Some(snapshot.state_root))?;
        Ok(root)
    }

    /// Export the current state for the state-snapshot endpoint.
    pub fn export_state_snapshot(&self) -> Result<Option<StateSnapshot>, ChainError> {
        let Some(tip) = self.index.latest_block()? else {
            return Ok(None);
        };
        Ok(Some(StateSnapshot::export(
            &self.state,
            tip.number,
            tip.hash,
        )?))
    }
}

struct BlockArtifacts {
    receipts: Vec<(Hash32, StoredTx, Address, Option<Address>)>,
    logs: Vec<IndexedLog>,
    contracts: Vec<(Address, ContractInfo)>,
}
