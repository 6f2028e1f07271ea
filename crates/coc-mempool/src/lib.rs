//! # Transaction Pool
//!
//! The pending pool between gossip ingress and block production.
//!
//! ## Data Structures
//!
//! - `by_hash`: O(1) lookup by transaction hash
//! - `by_sender`: every queued hash per account
//! - `by_sender_nonce`: the single occupant of each `(sender, nonce)` slot
//!
//! ## Rules Enforced
//!
//! - one transaction per `(sender, nonce)` slot; replacement needs a
//!   price bump of at least the configured percentage
//! - per-sender queue cap and a global pool cap with cheapest-first eviction
//! - EIP-1559 packing: effective price ordering, base-fee floor, per-sender
//!   nonce contiguity against the on-chain nonce

pub mod errors;
pub mod histogram;
pub mod pool;

pub use errors::MempoolError;
pub use histogram::{GasPriceHistogram, HistogramBucket};
pub use pool::{Mempool, MempoolConfig};
