//! # Environment Configuration
//!
//! Every recognized option with its type and default. Anything present
//! but unparsable fails startup; a missing option takes its default.

use primitive_types::U256;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use shared_types::EnforcementMode;

/// One recognized environment option, for `--help`-style listings.
pub struct OptionDesc {
    pub name: &'static str,
    pub kind: &'static str,
    pub default: &'static str,
    pub effect: &'static str,
}

/// The recognized option table.
pub const OPTIONS: &[OptionDesc] = &[
    OptionDesc { name: "COC_DATA_DIR", kind: "path", default: "./data", effect: "Data directory root" },
    OptionDesc { name: "COC_P2P_BIND", kind: "addr", default: "0.0.0.0:8545", effect: "Gossip listen address" },
    OptionDesc { name: "COC_BLOCK_INTERVAL_MS", kind: "ms", default: "3000", effect: "Inter-block time" },
    OptionDesc { name: "COC_SYNC_INTERVAL_MS", kind: "ms", default: "5000", effect: "Sync tick period" },
    OptionDesc { name: "COC_FINALITY_DEPTH", kind: "int", default: "3", effect: "Depth-based finality" },
    OptionDesc { name: "COC_MAX_TXS_PER_BLOCK", kind: "int", default: "50", effect: "Block tx cap" },
    OptionDesc { name: "COC_MIN_GAS_PRICE", kind: "wei", default: "1", effect: "Mempool admission floor" },
    OptionDesc { name: "COC_CHAIN_ID", kind: "int", default: "18780", effect: "Replay protection" },
    OptionDesc { name: "COC_SIGNATURE_MODE", kind: "enum", default: "enforce", effect: "off | monitor | enforce" },
    OptionDesc { name: "COC_P2P_AUTH_MODE", kind: "enum", default: "enforce", effect: "off | monitor | enforce" },
    OptionDesc { name: "COC_RATE_LIMIT_WINDOW_MS", kind: "ms", default: "60000", effect: "Per-IP gossip window" },
    OptionDesc { name: "COC_RATE_LIMIT_MAX", kind: "int", default: "240", effect: "Requests per window" },
    OptionDesc { name: "COC_BROADCAST_CONCURRENCY", kind: "int", default: "5", effect: "Outbound fan-out" },
    OptionDesc { name: "COC_MAX_PEERS", kind: "int", default: "50", effect: "Discovery cap" },
    OptionDesc { name: "COC_MAX_PEERS_PER_IP", kind: "int", default: "3", effect: "Anti-Sybil cap" },
    OptionDesc { name: "COC_AUTH_NONCE_TTL_MS", kind: "ms", default: "86400000", effect: "Replay window" },
    OptionDesc { name: "COC_AUTH_NONCE_MAX", kind: "int", default: "100000", effect: "Replay registry cap" },
    OptionDesc { name: "COC_AGENT_INTERVAL_MS", kind: "ms", default: "60000", effect: "PoSe tick period" },
    OptionDesc { name: "COC_AGENT_BATCH_SIZE", kind: "int", default: "5", effect: "Receipts per batch" },
    OptionDesc { name: "COC_AGENT_SAMPLE_SIZE", kind: "int", default: "2", effect: "Sampled batch proofs" },
    OptionDesc { name: "COC_EPOCH_MS", kind: "ms", default: "3600000", effect: "Governance/PoSe epoch" },
    OptionDesc { name: "COC_GOVERNANCE", kind: "bool", default: "false", effect: "Stake-weighted validator set" },
    OptionDesc { name: "COC_VALIDATORS", kind: "list", default: "", effect: "Round-robin validator ids" },
    OptionDesc { name: "COC_BOOTSTRAP_PEERS", kind: "list", default: "", effect: "id@url bootstrap entries" },
    OptionDesc { name: "COC_DNS_SEEDS", kind: "list", default: "", effect: "Seed TXT domains" },
    OptionDesc { name: "COC_REJECT_PRIVATE_PEERS", kind: "bool", default: "true", effect: "SSRF hardening" },
    OptionDesc { name: "COC_BFT", kind: "bool", default: "false", effect: "Wrap proposals in BFT rounds" },
    OptionDesc { name: "COC_L1_RPC_URL", kind: "url", default: "", effect: "PoSe manager RPC endpoint" },
];

/// Startup failures; any of these aborts the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("node key: {0}")]
    NodeKey(String),
}

/// Fully parsed node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub p2p_bind: SocketAddr,
    pub block_interval_ms: u64,
    pub sync_interval_ms: u64,
    pub finality_depth: u64,
    pub max_txs_per_block: usize,
    pub min_gas_price: U256,
    pub chain_id: u64,
    pub signature_mode: EnforcementMode,
    pub p2p_auth_mode: EnforcementMode,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max: usize,
    pub broadcast_concurrency: usize,
    pub max_peers: usize,
    pub max_peers_per_ip: usize,
    pub auth_nonce_ttl_ms: u64,
    pub auth_nonce_max: usize,
    pub agent_interval_ms: u64,
    pub agent_batch_size: usize,
    pub agent_sample_size: usize,
    pub epoch_ms: u64,
    pub governance: bool,
    pub validators: Vec<String>,
    /// `(id, url)` bootstrap pairs.
    pub bootstrap_peers: Vec<(String, String)>,
    pub dns_seeds: Vec<String>,
    pub reject_private_peers: bool,
    pub bft: bool,
    pub l1_rpc_url: Option<String>,
}

impl NodeConfig {
    /// Parse from process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Parse from any lookup (tests inject maps).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &'static str,
            default: T,
        ) -> Result<T, ConfigError> {
            match lookup(name) {
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    name,
                    value: raw,
                }),
                None => Ok(default),
            }
        }

        fn parse_mode(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &'static str,
        ) -> Result<EnforcementMode, ConfigError> {
            match lookup(name) {
                Some(raw) => EnforcementMode::parse(&raw).ok_or(ConfigError::Invalid {
                    name,
                    value: raw,
                }),
                None => Ok(EnforcementMode::Enforce),
            }
        }

        fn parse_list(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Vec<String> {
            lookup(name)
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()
        }

        let min_gas_price = match lookup("COC_MIN_GAS_PRICE") {
            Some(raw) => {
                U256::from_dec_str(raw.trim()).map_err(|_| ConfigError::Invalid {
                    name: "COC_MIN_GAS_PRICE",
                    value: raw,
                })?
            }
            None => U256::one(),
        };

        let bootstrap_peers = parse_list(&lookup, "COC_BOOTSTRAP_PEERS")
            .into_iter()
            .map(|entry| {
                entry
                    .split_once('@')
                    .map(|(id, url)| (id.to_string(), url.to_string()))
                    .ok_or(ConfigError::Invalid {
                        name: "COC_BOOTSTRAP_PEERS",
                        value: entry,
                    })
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            data_dir: PathBuf::from(
                lookup("COC_DATA_DIR").unwrap_or_else(|| "./data".to_string()),
            ),
            p2p_bind: parse(&lookup, "COC_P2P_BIND", "0.0.0.0:8545".parse().expect("default bind"))?,
            block_interval_ms: parse(&lookup, "COC_BLOCK_INTERVAL_MS", 3_000)?,
            sync_interval_ms: parse(&lookup, "COC_SYNC_INTERVAL_MS", 5_000)?,
            finality_depth: parse(&lookup, "COC_FINALITY_DEPTH", 3)?,
            max_txs_per_block: parse(&lookup, "COC_MAX_TXS_PER_BLOCK", 50)?,
            min_gas_price,
            chain_id: parse(&lookup, "COC_CHAIN_ID", 18_780)?,
            signature_mode: parse_mode(&lookup, "COC_SIGNATURE_MODE")?,
            p2p_auth_mode: parse_mode(&lookup, "COC_P2P_AUTH_MODE")?,
            rate_limit_window_ms: parse(&lookup, "COC_RATE_LIMIT_WINDOW_MS", 60_000)?,
            rate_limit_max: parse(&lookup, "COC_RATE_LIMIT_MAX", 240)?,
            broadcast_concurrency: parse(&lookup, "COC_BROADCAST_CONCURRENCY", 5)?,
            max_peers: parse(&lookup, "COC_MAX_PEERS", 50)?,
            max_peers_per_ip: parse(&lookup, "COC_MAX_PEERS_PER_IP", 3)?,
            auth_nonce_ttl_ms: parse(&lookup, "COC_AUTH_NONCE_TTL_MS", 86_400_000)?,
            auth_nonce_max: parse(&lookup, "COC_AUTH_NONCE_MAX", 100_000)?,
            agent_interval_ms: parse(&lookup, "COC_AGENT_INTERVAL_MS", 60_000)?,
            agent_batch_size: parse(&lookup, "COC_AGENT_BATCH_SIZE", 5)?,
            agent_sample_size: parse(&lookup, "COC_AGENT_SAMPLE_SIZE", 2)?,
            epoch_ms: parse(&lookup, "COC_EPOCH_MS", shared_types::DEFAULT_EPOCH_MS)?,
            governance: parse(&lookup, "COC_GOVERNANCE", false)?,
            validators: parse_list(&lookup, "COC_VALIDATORS"),
            bootstrap_peers,
            dns_seeds: parse_list(&lookup, "COC_DNS_SEEDS"),
            reject_private_peers: parse(&lookup, "COC_REJECT_PRIVATE_PEERS", true)?,
            bft: parse(&lookup, "COC_BFT", false)?,
            l1_rpc_url: lookup("COC_L1_RPC_URL").filter(|s| !s.trim().is_empty()),
        })
    }

    /// `<dataDir>/chain`: the KV namespace.
    pub fn chain_dir(&self) -> PathBuf {
        self.data_dir.join("chain")
    }

    /// `<dataDir>/node-key`: the 32-byte private key as 0x hex.
    pub fn node_key_path(&self) -> PathBuf {
        self.data_dir.join("node-key")
    }

    pub fn auth_nonce_log_path(&self) -> PathBuf {
        self.data_dir.join("used-nonces.log")
    }

    pub fn pose_nonce_log_path(&self) -> PathBuf {
        self.data_dir.join("nonce-registry.log")
    }

    pub fn pending_receipts_path(&self) -> PathBuf {
        self.data_dir.join("pending-receipts.jsonl")
    }

    pub fn evidence_path(&self) -> PathBuf {
        self.data_dir.join("evidence-agent.jsonl")
    }
}

/// Load or provision the node key at `path` (created mode 0600).
pub fn load_or_create_node_key(
    path: &std::path::Path,
) -> Result<shared_crypto::NodeSigner, ConfigError> {
    use shared_crypto::NodeSigner;
    if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::NodeKey(e.to_string()))?;
        return NodeSigner::from_hex(raw.trim()).map_err(|e| ConfigError::NodeKey(e.to_string()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::NodeKey(e.to_string()))?;
    }
    let signer = NodeSigner::random();
    std::fs::write(path, format!("{}\n", signer.to_hex()))
        .map_err(|e| ConfigError::NodeKey(e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| ConfigError::NodeKey(e.to_string()))?;
    }
    Ok(signer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + '_ {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn defaults_match_the_option_table() {
        let config = NodeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.block_interval_ms, 3_000);
        assert_eq!(config.sync_interval_ms, 5_000);
        assert_eq!(config.finality_depth, 3);
        assert_eq!(config.max_txs_per_block, 50);
        assert_eq!(config.min_gas_price, U256::one());
        assert_eq!(config.chain_id, 18_780);
        assert!(config.signature_mode.is_enforce());
        assert!(config.p2p_auth_mode.is_enforce());
        assert_eq!(config.rate_limit_window_ms, 60_000);
        assert_eq!(config.rate_limit_max, 240);
        assert_eq!(config.broadcast_concurrency, 5);
        assert_eq!(config.max_peers, 50);
        assert_eq!(config.max_peers_per_ip, 3);
        assert_eq!(config.auth_nonce_ttl_ms, 86_400_000);
        assert_eq!(config.auth_nonce_max, 100_000);
        assert_eq!(config.agent_interval_ms, 60_000);
        assert_eq!(config.agent_batch_size, 5);
        assert_eq!(config.agent_sample_size, 2);
    }

    #[test]
    fn invalid_values_fail_startup() {
        let result =
            NodeConfig::from_lookup(lookup_from(&[("COC_BLOCK_INTERVAL_MS", "soon")]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "COC_BLOCK_INTERVAL_MS", .. })
        ));
        let result = NodeConfig::from_lookup(lookup_from(&[("COC_SIGNATURE_MODE", "strict")]));
        assert!(result.is_err());
    }

    #[test]
    fn lists_and_bootstrap_pairs_parse() {
        let lookup = lookup_from(&[
            ("COC_VALIDATORS", "v1, v2 ,v3"),
            (
                "COC_BOOTSTRAP_PEERS",
                "0xaa@http://a.example.org,0xbb@http://b.example.org",
            ),
        ]);
        let config = NodeConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.validators, vec!["v1", "v2", "v3"]);
        assert_eq!(config.bootstrap_peers.len(), 2);
        assert_eq!(config.bootstrap_peers[0].0, "0xaa");

        let bad = NodeConfig::from_lookup(lookup_from(&[(
            "COC_BOOTSTRAP_PEERS",
            "no-at-sign.example.org",
        )]));
        assert!(bad.is_err());
    }

    #[test]
    fn node_key_roundtrips_and_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-key");
        let created = load_or_create_node_key(&path).unwrap();
        let reloaded = load_or_create_node_key(&path).unwrap();
        assert_eq!(created.address(), reloaded.address());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn option_table_names_are_unique() {
        let mut names: Vec<&str> = OPTIONS.iter().map(|o| o.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
    }
}
