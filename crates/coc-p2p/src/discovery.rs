//! # Peer Discovery
//!
//! Known peers plus a quarantine for unverified discoveries. Static
//! bootstrap peers are trusted at construction; everything learned from
//! gossip or DNS sits in quarantine until it answers an identity-proof
//! challenge. Candidates are filtered hard before they touch either map:
//! id shape, URL scheme, self/duplicate checks, a per-IP cap, and an SSRF
//! blocklist covering loopback, link-local, cloud metadata and (when
//! configured) RFC-1918 space.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// A peer as discovery tracks it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Lowercase `0x` + 40 hex node id.
    pub id: String,
    /// Base URL, `http(s)://host[:port]`.
    pub url: String,
    pub added_at_ms: u64,
    /// Whether the peer passed identity verification.
    #[serde(default)]
    pub verified: bool,
}

/// Discovery limits.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub max_peers: usize,
    pub max_peers_per_ip: usize,
    /// Reject RFC-1918 targets (off for lab deployments).
    pub reject_private: bool,
    pub discovery_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_peers: 50,
            max_peers_per_ip: 3,
            reject_private: true,
            discovery_interval_ms: 30_000,
        }
    }
}

/// The peer book: known (verified or bootstrap) and quarantined peers.
pub struct Discovery {
    config: DiscoveryConfig,
    local_id: String,
    known: Mutex<HashMap<String, PeerInfo>>,
    quarantine: Mutex<HashMap<String, PeerInfo>>,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig, local_id: String, bootstrap: Vec<PeerInfo>) -> Self {
        let discovery = Self {
            config,
            local_id: local_id.to_lowercase(),
            known: Mutex::new(HashMap::new()),
            quarantine: Mutex::new(HashMap::new()),
        };
        for mut peer in bootstrap {
            peer.id = peer.id.to_lowercase();
            peer.verified = true;
            if discovery.filter(&peer).is_ok() {
                discovery.known.lock().insert(peer.id.clone(), peer);
            }
        }
        discovery
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn known_count(&self) -> usize {
        self.known.lock().len()
    }

    pub fn quarantined_count(&self) -> usize {
        self.quarantine.lock().len()
    }

    /// Known peers, capped (the `/p2p/peers` endpoint caps at 20).
    pub fn known_peers(&self, cap: usize) -> Vec<PeerInfo> {
        self.known.lock().values().take(cap).cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<PeerInfo> {
        self.known.lock().get(&id.to_lowercase()).cloned()
    }

    /// Sample up to `count` known peers for a discovery round.
    pub fn sample(&self, count: usize) -> Vec<PeerInfo> {
        use rand::seq::SliceRandom;
        let known = self.known.lock();
        let mut peers: Vec<PeerInfo> = known.values().cloned().collect();
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(count);
        peers
    }

    /// Offer a discovered candidate. It lands in quarantine until an
    /// identity proof promotes it.
    pub fn add_candidate(&self, mut peer: PeerInfo, now_ms: u64) -> Result<(), &'static str> {
        peer.id = peer.id.to_lowercase();
        peer.verified = false;
        peer.added_at_ms = now_ms;
        self.filter(&peer)?;
        debug!(id = %peer.id, url = %peer.url, "peer quarantined");
        self.quarantine.lock().insert(peer.id.clone(), peer);
        Ok(())
    }

    /// Promote a quarantined peer after identity verification.
    pub fn promote(&self, id: &str) -> bool {
        let id = id.to_lowercase();
        let Some(mut peer) = self.quarantine.lock().remove(&id) else {
            return false;
        };
        peer.verified = true;
        info!(id = %peer.id, "peer promoted from quarantine");
        self.known.lock().insert(id, peer);
        true
    }

    /// Next quarantined peers to challenge.
    pub fn quarantined(&self, cap: usize) -> Vec<PeerInfo> {
        self.quarantine.lock().values().take(cap).cloned().collect()
    }

    pub fn remove(&self, id: &str) {
        let id = id.to_lowercase();
        self.known.lock().remove(&id);
        self.quarantine.lock().remove(&id);
    }

    /// The admission filter every candidate passes.
    pub fn filter(&self, peer: &PeerInfo) -> Result<(), &'static str> {
        if !valid_node_id(&peer.id) {
            return Err("invalid id");
        }
        if peer.id == self.local_id {
            return Err("self");
        }
        let host = host_of(&peer.url).ok_or("invalid url")?;
        if is_blocked_host(&host, self.config.reject_private) {
            return Err("blocked host");
        }
        let known = self.known.lock();
        if known.contains_key(&peer.id) {
            return Err("duplicate");
        }
        if known.len() + self.quarantine.lock().len() >= self.config.max_peers {
            return Err("peer cap");
        }
        let same_ip = known
            .values()
            .filter(|p| host_of(&p.url).as_deref() == Some(host.as_str()))
            .count();
        if same_ip >= self.config.max_peers_per_ip {
            return Err("per-ip cap");
        }
        Ok(())
    }
}

/// `0x` + 40 lowercase hex characters.
fn valid_node_id(id: &str) -> bool {
    id.len() == 42
        && id.starts_with("0x")
        && id[2..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Extract the host from an `http(s)` URL; any other scheme fails.
pub fn host_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    if authority.is_empty() {
        return None;
    }
    // Strip the port; IPv6 literals keep their brackets' content.
    let host = if let Some(stripped) = authority.strip_prefix('[') {
        stripped.split(']').next()?.to_string()
    } else {
        authority.split(':').next()?.to_string()
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// SSRF blocklist: loopback, link-local (including the cloud metadata
/// endpoint), unspecified, and optionally RFC-1918.
fn is_blocked_host(host: &str, reject_private: bool) -> bool {
    if host == "localhost" || host == "metadata.google.internal" {
        return true;
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        match ip {
            std::net::IpAddr::V4(v4) => {
                if v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() {
                    return true;
                }
                if reject_private && v4.is_private() {
                    return true;
                }
            }
            std::net::IpAddr::V6(v6) => {
                if v6.is_loopback() || v6.is_unspecified() {
                    return true;
                }
                // fe80::/10 link-local.
                if (v6.segments()[0] & 0xffc0) == 0xfe80 {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = "0x1111111111111111111111111111111111111111";

    fn peer(id_byte: char, host: &str) -> PeerInfo {
        PeerInfo {
            id: format!("0x{}", id_byte.to_string().repeat(40)),
            url: format!("http://{host}:8545"),
            added_at_ms: 0,
            verified: false,
        }
    }

    fn discovery() -> Discovery {
        Discovery::new(DiscoveryConfig::default(), LOCAL.into(), Vec::new())
    }

    #[test]
    fn bootstrap_peers_are_known_and_verified() {
        let d = Discovery::new(
            DiscoveryConfig::default(),
            LOCAL.into(),
            vec![peer('a', "peer-a.example.org")],
        );
        assert_eq!(d.known_count(), 1);
        assert!(d.known_peers(20)[0].verified);
    }

    #[test]
    fn candidates_go_through_quarantine() {
        let d = discovery();
        d.add_candidate(peer('b', "peer-b.example.org"), 0).unwrap();
        assert_eq!(d.known_count(), 0);
        assert_eq!(d.quarantined_count(), 1);
        assert!(d.promote(&peer('b', "x").id));
        assert_eq!(d.known_count(), 1);
        assert!(!d.promote("0xffffffffffffffffffffffffffffffffffffffff"));
    }

    #[test]
    fn filter_rejects_bad_ids_self_and_schemes() {
        let d = discovery();
        let mut bad_id = peer('c', "ok.example.org");
        bad_id.id = "not-an-id".into();
        assert_eq!(d.filter(&bad_id), Err("invalid id"));

        let mut own = peer('1', "ok.example.org");
        own.id = LOCAL.into();
        assert_eq!(d.filter(&own), Err("self"));

        let mut ftp = peer('d', "ok.example.org");
        ftp.url = "ftp://ok.example.org".into();
        assert_eq!(d.filter(&ftp), Err("invalid url"));
    }

    #[test]
    fn filter_blocks_ssrf_targets() {
        let d = discovery();
        for host in [
            "127.0.0.1",
            "localhost",
            "169.254.169.254",
            "metadata.google.internal",
            "0.0.0.0",
            "10.0.0.5",
            "172.16.3.3",
            "192.168.1.1",
        ] {
            assert_eq!(d.filter(&peer('e', host)), Err("blocked host"), "{host}");
        }
        // Private space is allowed when configured for lab use.
        let lab = Discovery::new(
            DiscoveryConfig {
                reject_private: false,
                ..Default::default()
            },
            LOCAL.into(),
            Vec::new(),
        );
        assert!(lab.filter(&peer('e', "10.0.0.5")).is_ok());
        // Loopback stays blocked even in lab mode.
        assert_eq!(lab.filter(&peer('e', "127.0.0.1")), Err("blocked host"));
    }

    #[test]
    fn per_ip_cap_is_enforced() {
        let d = Discovery::new(
            DiscoveryConfig {
                max_peers_per_ip: 2,
                ..Default::default()
            },
            LOCAL.into(),
            vec![peer('a', "shared.example.org"), peer('b', "shared.example.org")],
        );
        assert_eq!(
            d.filter(&peer('c', "shared.example.org")),
            Err("per-ip cap")
        );
        assert!(d.filter(&peer('c', "other.example.org")).is_ok());
    }

    #[test]
    fn duplicate_known_peer_is_rejected() {
        let d = Discovery::new(
            DiscoveryConfig::default(),
            LOCAL.into(),
            vec![peer('a', "a.example.org")],
        );
        assert_eq!(d.filter(&peer('a', "elsewhere.example.org")), Err("duplicate"));
    }

    #[test]
    fn host_parsing_handles_ports_paths_and_v6() {
        assert_eq!(
            host_of("http://node.example.org:8545/p2p/peers"),
            Some("node.example.org".into())
        );
        assert_eq!(host_of("https://NODE.example.org"), Some("node.example.org".into()));
        assert_eq!(host_of("http://[::1]:8545"), Some("::1".into()));
        assert_eq!(host_of("ws://node.example.org"), None);
        assert_eq!(host_of("http://"), None);
    }
}
