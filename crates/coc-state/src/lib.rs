//! # State Management
//!
//! The node's account state behind a Merkle-Patricia commitment.
//!
//! ## Architecture
//!
//! Accounts, storage slots and code live as flat records in the shared KV
//! namespace for O(1) access; the trie exists to *commit* to them. Every
//! `commit()` rebuilds the commitment from the flat records, persists the
//! node set and checkpoints the root under `meta:stateRoot`, so a restart
//! can skip block replay when the checkpoint still matches.
//!
//! ## Node Types
//!
//! - **Empty**: null reference
//! - **Leaf**: terminal node with remaining path + value
//! - **Extension**: shared-prefix optimization node
//! - **Branch**: 16-way branch + optional value

pub mod errors;
pub mod nibbles;
pub mod node;
pub mod snapshot;
pub mod store;
pub mod trie;

pub use errors::StateError;
pub use nibbles::Nibbles;
pub use node::TrieNode;
pub use snapshot::{AccountSnapshot, StateSnapshot, SNAPSHOT_VERSION};
pub use store::{StateBackup, StateStore};
pub use trie::build_trie;
