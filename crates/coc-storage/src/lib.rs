//! # Chain Storage
//!
//! Durable append-only chain data behind a key-value abstraction.
//!
//! Three logical indexes share one namespace:
//!
//! - **Block index**: blocks by height and hash, the latest-block pointer,
//!   per-height logs, transactions with receipts, address->tx backlinks and
//!   the contract registry.
//! - **Nonce registry**: confirmed transaction hashes, for replay prevention.
//! - **State trie**: node and code records written by the state crate
//!   through the same [`KvStore`].
//!
//! Atomicity unit is the batch: `put_block` writes block, hash index and
//! latest pointer in one all-or-nothing write. Any I/O error is surfaced to
//! the caller, which aborts its current tick.

pub mod block_index;
pub mod errors;
pub mod keys;
pub mod kv;
pub mod nonce_log;
#[cfg(feature = "rocks")]
pub mod rocks;

pub use block_index::{BlockIndex, ContractInfo, StoredTx};
pub use errors::StorageError;
pub use kv::{KvStore, MemoryKv, WriteOp};
pub use nonce_log::PersistentNonceLog;
#[cfg(feature = "rocks")]
pub use rocks::RocksKv;
