//! P2P error types.

use thiserror::Error;

/// Failures at the gossip boundary. Network responses never leak internal
/// detail; these map to plain 4xx/5xx statuses at the server edge.
#[derive(Debug, Error)]
pub enum P2pError {
    /// Request envelope rejected (missing, malformed, stale or replayed).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Sliding-window limit exceeded for the source IP.
    #[error("rate limited")]
    RateLimited,

    /// The peer is currently banned.
    #[error("peer banned")]
    Banned,

    /// Body failed to parse as the expected payload.
    #[error("bad payload: {0}")]
    BadPayload(String),

    /// Outbound request failed or timed out.
    #[error("peer io: {0}")]
    PeerIo(String),

    /// DNS seed lookup failed.
    #[error("dns: {0}")]
    Dns(String),

    /// Persistent nonce log failure.
    #[error("nonce log: {0}")]
    NonceLog(String),
}
