//! # DNS Seeds
//!
//! Bootstrap discovery from TXT records of the form
//! `coc-peer:<id>:<url>`. Lookups are cached with a TTL; parsed entries
//! feed the same discovery filter as gossip-learned peers, so a poisoned
//! zone cannot point the node at a private or metadata address.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::discovery::PeerInfo;
use crate::errors::P2pError;

/// TXT record prefix marking a seed entry.
pub const SEED_RECORD_PREFIX: &str = "coc-peer:";

/// Abstract TXT lookup, so tests can feed records without a network.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn txt(&self, domain: &str) -> Result<Vec<String>, P2pError>;
}

/// Production resolver over hickory.
pub struct HickoryTxtResolver {
    resolver: hickory_resolver::TokioAsyncResolver,
}

impl HickoryTxtResolver {
    pub fn system() -> Result<Self, P2pError> {
        let resolver = hickory_resolver::TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| P2pError::Dns(e.to_string()))?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn txt(&self, domain: &str) -> Result<Vec<String>, P2pError> {
        let lookup = self
            .resolver
            .txt_lookup(domain.to_string())
            .await
            .map_err(|e| P2pError::Dns(e.to_string()))?;
        Ok(lookup
            .iter()
            .map(|record| {
                record
                    .txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).to_string())
                    .collect::<String>()
            })
            .collect())
    }
}

struct CachedSeeds {
    peers: Vec<PeerInfo>,
    fetched_at_ms: u64,
}

/// TTL-cached seed resolution over any [`TxtResolver`].
pub struct DnsSeedResolver {
    resolver: Box<dyn TxtResolver>,
    ttl_ms: u64,
    cache: Mutex<HashMap<String, CachedSeeds>>,
}

impl DnsSeedResolver {
    pub fn new(resolver: Box<dyn TxtResolver>, ttl_ms: u64) -> Self {
        Self {
            resolver,
            ttl_ms,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve one seed domain, serving from cache inside the TTL.
    pub async fn resolve(&self, domain: &str, now_ms: u64) -> Result<Vec<PeerInfo>, P2pError> {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.get(domain) {
                if now_ms.saturating_sub(cached.fetched_at_ms) < self.ttl_ms {
                    return Ok(cached.peers.clone());
                }
            }
        }

        let records = self.resolver.txt(domain).await?;
        let peers = parse_seed_records(&records, now_ms);
        debug!(domain, found = peers.len(), "dns seeds resolved");
        self.cache.lock().insert(
            domain.to_string(),
            CachedSeeds {
                peers: peers.clone(),
                fetched_at_ms: now_ms,
            },
        );
        Ok(peers)
    }
}

/// Parse `coc-peer:<id>:<url>` records; anything malformed is skipped with
/// a warning.
pub fn parse_seed_records(records: &[String], now_ms: u64) -> Vec<PeerInfo> {
    let mut peers = Vec::new();
    for record in records {
        let Some(rest) = record.strip_prefix(SEED_RECORD_PREFIX) else {
            continue;
        };
        // The url itself contains ':', so split only once.
        let Some((id, url)) = rest.split_once(':') else {
            warn!(record, "malformed seed record");
            continue;
        };
        if id.is_empty() || url.is_empty() {
            warn!(record, "malformed seed record");
            continue;
        }
        peers.push(PeerInfo {
            id: id.to_lowercase(),
            url: url.to_string(),
            added_at_ms: now_ms,
            verified: false,
        });
    }
    peers
}
