//! # Node Wiring
//!
//! Builds the full subsystem graph from a parsed configuration: storage,
//! state, mempool, governance, engine, coordinator, gossip and the PoSe
//! agent. The container owns everything behind `Arc`s; tick loops and the
//! HTTP server borrow from here.

use parking_lot::Mutex;
use primitive_types::U256;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use coc_bft::{BftConfig, BftCoordinator, EquivocationSink};
use coc_bus::EventBus;
use coc_chain::{ChainEngine, EngineConfig, TransferEvm};
use coc_governance::{GovernanceConfig, ValidatorSet};
use coc_mempool::{Mempool, MempoolConfig};
use coc_p2p::{
    AuthConfig, AuthVerifier, Broadcaster, Discovery, DiscoveryConfig, PeerClient, PeerInfo,
    PeerScoring, P2pState, ScoringConfig, SlidingWindowLimiter,
};
use coc_pose::{
    EvidenceJournal, L1Client, PoseAgent, PoseAgentConfig, PoseError, PoseTransport,
    ReceiptJournal, TargetNode,
};
use coc_state::StateStore;
use coc_storage::{BlockIndex, KvStore, PersistentNonceLog};
use coc_telemetry::NodeMetrics;
use shared_crypto::NodeSigner;
use shared_types::{Address, EvidenceKind, EvidenceRecord, Hash32, PoseBatch, PoseReceipt, Validator};

use crate::config::{load_or_create_node_key, ConfigError, NodeConfig};
use crate::hooks::EngineHooks;
use crate::now_ms;

/// The wired node.
pub struct Node {
    pub config: NodeConfig,
    pub signer: Arc<NodeSigner>,
    pub engine: Arc<Mutex<ChainEngine>>,
    pub bft: Arc<Mutex<BftCoordinator>>,
    pub hooks: Arc<EngineHooks>,
    pub p2p: Arc<P2pState>,
    pub client: PeerClient,
    pub discovery: Arc<Discovery>,
    pub scoring: Arc<PeerScoring>,
    pub metrics: Arc<NodeMetrics>,
    pub agent: Arc<PoseAgent>,
    pub shutdown: watch::Sender<bool>,
}

impl Node {
    /// Build against the production RocksDB backend.
    #[cfg(feature = "rocks")]
    pub fn build(config: NodeConfig) -> anyhow::Result<Self> {
        let kv: Arc<dyn KvStore> = Arc::new(coc_storage::RocksKv::open(&config.chain_dir())?);
        Self::build_with_kv(config, kv)
    }

    /// Build against any KV backend (tests use the in-memory store).
    pub fn build_with_kv(config: NodeConfig, kv: Arc<dyn KvStore>) -> anyhow::Result<Self> {
        let signer = Arc::new(load_or_create_node_key(&config.node_key_path())?);
        let local_id = signer.node_id();
        info!(node_id = %local_id, "node identity loaded");

        // Storage, state, mempool, governance, engine.
        let index = BlockIndex::new(Arc::clone(&kv));
        let state = StateStore::open(Arc::clone(&kv))?;
        let mempool = Mempool::new(MempoolConfig {
            chain_id: config.chain_id,
            min_gas_price: config.min_gas_price,
            ..Default::default()
        });
        let governance = if config.governance {
            Some(ValidatorSet::with_genesis(
                GovernanceConfig::default(),
                genesis_validators(&config)?,
            )?)
        } else {
            None
        };
        let engine_config = EngineConfig {
            chain_id: config.chain_id,
            finality_depth: config.finality_depth,
            max_txs_per_block: config.max_txs_per_block,
            min_gas_price: config.min_gas_price,
            signature_mode: config.signature_mode,
            validators: if config.validators.is_empty() {
                vec![local_id.clone()]
            } else {
                config.validators.iter().map(|v| validator_id(v)).collect()
            },
            prefunds: Vec::new(),
        };
        let mut engine = ChainEngine::new(
            engine_config,
            index,
            state,
            mempool,
            governance,
            EventBus::default(),
            Box::new(TransferEvm::new()),
            NodeSigner::from_hex(&signer.to_hex()).map_err(|e| anyhow::anyhow!("{e}"))?,
        );
        engine.init(now_ms())?;
        let engine = Arc::new(Mutex::new(engine));

        // BFT coordinator, with equivocation evidence wired to the journal.
        let evidence = Arc::new(EvidenceJournal::open(&config.evidence_path())?);
        let bft = Arc::new(Mutex::new(
            BftCoordinator::new(BftConfig::default(), local_id.clone()).with_sink(Box::new(
                EvidenceSink {
                    journal: Arc::clone(&evidence),
                    epoch_ms: config.epoch_ms,
                },
            )),
        ));

        // P2P: discovery, scoring, client, broadcaster, server state.
        let bootstrap: Vec<PeerInfo> = config
            .bootstrap_peers
            .iter()
            .map(|(id, url)| PeerInfo {
                id: id.clone(),
                url: url.clone(),
                added_at_ms: now_ms(),
                verified: true,
            })
            .collect();
        let discovery = Arc::new(Discovery::new(
            DiscoveryConfig {
                max_peers: config.max_peers,
                max_peers_per_ip: config.max_peers_per_ip,
                reject_private: config.reject_private_peers,
                discovery_interval_ms: config.sync_interval_ms.max(5_000),
            },
            local_id.clone(),
            bootstrap,
        ));
        let scoring = Arc::new(PeerScoring::new(ScoringConfig::default()));
        let client = PeerClient::new(Arc::clone(&signer), 10_000)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        let broadcaster = Arc::new(Broadcaster::new(
            client.clone(),
            Arc::clone(&scoring),
            config.broadcast_concurrency,
        ));
        let metrics = Arc::new(NodeMetrics::new());

        let hooks = Arc::new(EngineHooks {
            engine: Arc::clone(&engine),
            bft: Arc::clone(&bft),
            broadcaster: Arc::clone(&broadcaster),
            discovery: Arc::clone(&discovery),
            metrics: Arc::clone(&metrics),
            fanout_peers: config.max_peers,
        });

        let auth_log = PersistentNonceLog::open(
            &config.auth_nonce_log_path(),
            config.auth_nonce_ttl_ms,
            config.auth_nonce_max,
            now_ms(),
        )?;
        let p2p = Arc::new(P2pState::new(
            Arc::clone(&hooks) as Arc<dyn coc_p2p::NodeHooks>,
            AuthVerifier::new(
                AuthConfig {
                    mode: config.p2p_auth_mode,
                    ..Default::default()
                },
                auth_log,
            ),
            SlidingWindowLimiter::new(config.rate_limit_window_ms, config.rate_limit_max),
            Arc::clone(&scoring),
            Arc::clone(&discovery),
            Arc::clone(&signer),
            Arc::clone(&broadcaster),
            "coc/1".to_string(),
            config.max_peers,
        ));

        // PoSe agent over the same client and replay infrastructure.
        let pose_registry = PersistentNonceLog::open(
            &config.pose_nonce_log_path(),
            0,
            config.auth_nonce_max,
            now_ms(),
        )?;
        let receipts = ReceiptJournal::open(&config.pending_receipts_path())?;
        let pose_evidence = EvidenceJournal::open(&config.evidence_path())?;
        let challenger_set = {
            let engine = engine.lock();
            match engine.governance() {
                Some(set) => set.active_sorted().iter().map(|v| v.id.clone()).collect(),
                None => vec![local_id.clone()],
            }
        };
        let l1: Arc<dyn L1Client> = match &config.l1_rpc_url {
            Some(url) => Arc::new(HttpL1Client {
                url: url.clone(),
                http: reqwest_client(10_000)?,
            }),
            None => Arc::new(LocalL1 {
                engine: Arc::clone(&engine),
            }),
        };
        let agent = Arc::new(PoseAgent::new(
            PoseAgentConfig {
                epoch_ms: config.epoch_ms,
                batch_size: config.agent_batch_size,
                sample_size: config.agent_sample_size,
                ..Default::default()
            },
            Arc::clone(&signer),
            Arc::new(HttpPoseTransport {
                client: client.clone(),
            }),
            l1,
            pose_registry,
            receipts,
            pose_evidence,
            challenger_set,
        ));

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            signer,
            engine,
            bft,
            hooks,
            p2p,
            client,
            discovery,
            scoring,
            metrics,
            agent,
            shutdown,
        })
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        info!("shutdown signalled");
    }
}

/// `id` or `id:stake` entries; only the id part names the proposer.
fn validator_id(entry: &str) -> String {
    entry.split(':').next().unwrap_or(entry).to_lowercase()
}

/// Parse governance genesis entries: `id` (stake 100) or `id:stake`; the
/// id doubles as the address for address-shaped ids.
fn genesis_validators(config: &NodeConfig) -> Result<Vec<Validator>, ConfigError> {
    config
        .validators
        .iter()
        .map(|entry| {
            let (id, stake) = match entry.split_once(':') {
                Some((id, stake_raw)) => (
                    id,
                    U256::from_dec_str(stake_raw.trim()).map_err(|_| ConfigError::Invalid {
                        name: "COC_VALIDATORS",
                        value: entry.clone(),
                    })?,
                ),
                None => (entry.as_str(), U256::from(100u64)),
            };
            let address = Address::from_hex(id).unwrap_or(Address::ZERO);
            Ok(Validator {
                id: id.to_lowercase(),
                address,
                stake,
                joined_at_epoch: 0,
                active: true,
                voting_power: 0,
            })
        })
        .collect()
}

fn reqwest_client(timeout_ms: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| anyhow::anyhow!("{e}"))
}

/// BFT equivocation reports land in the evidence journal.
struct EvidenceSink {
    journal: Arc<EvidenceJournal>,
    epoch_ms: u64,
}

impl EquivocationSink for EvidenceSink {
    fn report(&self, voter: &str, height: u64, first: Hash32, second: Hash32) {
        let now = now_ms();
        let record = EvidenceRecord {
            kind: EvidenceKind::Equivocation,
            subject: voter.to_string(),
            epoch_id: shared_types::epoch_of(now, self.epoch_ms),
            recorded_at_ms: now,
            detail: format!("height {height}: {first} vs {second}"),
        };
        if let Err(e) = self.journal.append(&record) {
            warn!(error = %e, "equivocation evidence append failed");
        }
    }
}

/// PoSe delivery over the authenticated peer client.
struct HttpPoseTransport {
    client: PeerClient,
}

#[async_trait::async_trait]
impl PoseTransport for HttpPoseTransport {
    async fn post_challenge(
        &self,
        target: &TargetNode,
        challenge: &shared_types::Challenge,
    ) -> Result<PoseReceipt, PoseError> {
        let peer = PeerInfo {
            id: target.id.clone(),
            url: target.url.clone(),
            added_at_ms: 0,
            verified: true,
        };
        let payload = serde_json::to_value(challenge)
            .map_err(|e| PoseError::Malformed(e.to_string()))?;
        let response = self
            .client
            .post(&peer, "/pose/challenge", payload, now_ms())
            .await
            .map_err(|e| PoseError::Timeout(e.to_string()))?;
        serde_json::from_value(response).map_err(|e| PoseError::Malformed(e.to_string()))
    }
}

/// PoSe manager over a remote RPC endpoint.
struct HttpL1Client {
    url: String,
    http: reqwest::Client,
}

#[async_trait::async_trait]
impl L1Client for HttpL1Client {
    async fn latest_height(&self) -> Result<u64, PoseError> {
        let response: serde_json::Value = self
            .http
            .post(&self.url)
            .json(&json!({"method": "pose_latestHeight", "params": []}))
            .send()
            .await
            .map_err(|e| PoseError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| PoseError::Rpc(e.to_string()))?;
        response
            .get("result")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| PoseError::Rpc("missing result".into()))
    }

    async fn is_registered(&self, node_id: &str) -> Result<bool, PoseError> {
        let response: serde_json::Value = self
            .http
            .post(&self.url)
            .json(&json!({"method": "pose_isRegistered", "params": [node_id]}))
            .send()
            .await
            .map_err(|e| PoseError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| PoseError::Rpc(e.to_string()))?;
        Ok(response
            .get("result")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false))
    }

    async fn submit_batch(&self, batch: &PoseBatch) -> Result<(), PoseError> {
        self.http
            .post(&self.url)
            .json(&json!({"method": "pose_submitBatch", "params": [batch]}))
            .send()
            .await
            .map_err(|e| PoseError::Rpc(e.to_string()))?;
        Ok(())
    }
}

/// Without an external RPC the local chain is its own height reference
/// and batches are only logged.
struct LocalL1 {
    engine: Arc<Mutex<ChainEngine>>,
}

#[async_trait::async_trait]
impl L1Client for LocalL1 {
    async fn latest_height(&self) -> Result<u64, PoseError> {
        self.engine
            .lock()
            .tip()
            .map(|tip| tip.map(|b| b.number).unwrap_or(0))
            .map_err(|e| PoseError::Rpc(e.to_string()))
    }

    async fn is_registered(&self, _node_id: &str) -> Result<bool, PoseError> {
        Ok(true)
    }

    async fn submit_batch(&self, batch: &PoseBatch) -> Result<(), PoseError> {
        info!(epoch = batch.epoch_id, receipts = batch.receipt_count, "batch retained locally (no l1 rpc)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coc_storage::MemoryKv;

    fn config_in(dir: &tempfile::TempDir) -> NodeConfig {
        let mut config = NodeConfig::from_lookup(|_| None).unwrap();
        config.data_dir = dir.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn node_builds_and_solo_proposes() {
        let dir = tempfile::tempdir().unwrap();
        let node =
            Node::build_with_kv(config_in(&dir), Arc::new(MemoryKv::new())).unwrap();
        let block = node
            .engine
            .lock()
            .propose_next_block(now_ms())
            .unwrap()
            .expect("solo node proposes");
        assert_eq!(block.number, 1);
        assert_eq!(block.proposer, node.signer.node_id());
    }

    #[tokio::test]
    async fn governance_node_seeds_the_validator_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir);
        config.governance = true;
        config.validators = vec![
            "0x1111111111111111111111111111111111111111:300".into(),
            "0x2222222222222222222222222222222222222222:100".into(),
        ];
        let node =
            Node::build_with_kv(config, Arc::new(MemoryKv::new())).unwrap();
        let engine = node.engine.lock();
        let set = engine.governance().unwrap();
        assert_eq!(set.active_count(), 2);
        assert_eq!(
            set.stake_of("0x1111111111111111111111111111111111111111"),
            U256::from(300u64)
        );
    }
}
