//! # P2P Layer
//!
//! Authenticated HTTP gossip plus the machinery around it: per-IP rate
//! limiting, replay-proof request envelopes, peer discovery with
//! quarantine, reputation scoring with exponential bans, DNS seed
//! resolution and the bounded-concurrency broadcaster.
//!
//! The layer owns its seen-sets, scoring and rate limiter; the node core
//! is reached only through the [`NodeHooks`] trait, so gossip can never
//! call back into a handler that holds it.

pub mod auth;
pub mod broadcast;
pub mod client;
pub mod discovery;
pub mod dns_seeds;
pub mod errors;
pub mod hooks;
pub mod rate_limit;
pub mod scoring;
pub mod seen;
pub mod server;

pub use auth::{AuthConfig, AuthEnvelope, AuthVerifier};
pub use broadcast::{Broadcaster, BROADCAST_CONCURRENCY};
pub use client::PeerClient;
pub use discovery::{Discovery, DiscoveryConfig, PeerInfo};
pub use dns_seeds::{DnsSeedResolver, SEED_RECORD_PREFIX};
pub use errors::P2pError;
pub use hooks::NodeHooks;
pub use rate_limit::SlidingWindowLimiter;
pub use scoring::{PeerScoring, ScoreEvent, ScoringConfig};
pub use seen::SeenSet;
pub use server::{serve, P2pServerConfig, P2pState};
