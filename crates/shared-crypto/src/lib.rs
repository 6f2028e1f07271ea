//! # Shared Crypto - Signing and Recovery
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `eip191` | secp256k1 ECDSA + keccak-256 | Node identity, block/challenge/envelope signing |
//! | `messages` | n/a | Canonical message strings for every signed payload |
//!
//! ## Security Properties
//!
//! - **secp256k1**: RFC 6979 deterministic nonces, recoverable signatures
//! - **EIP-191**: every signed message is prefixed, so a signature can never
//!   be replayed as a transaction
//! - Key material is zeroized on drop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod eip191;
pub mod errors;
pub mod messages;

pub use eip191::{recover_address, NodeSigner};
pub use errors::CryptoError;
pub use messages::{
    block_message, identity_message, p2p_envelope_message, pose_challenge_message,
    pose_receipt_message,
};
