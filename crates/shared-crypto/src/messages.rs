//! # Canonical Signed Messages
//!
//! Every signature in the protocol covers one of the message shapes below.
//! Building them in one place keeps signer and verifier byte-identical; a
//! single stray separator would silently invalidate every signature.

use serde_json::Value;

use shared_types::{stable_stringify, keccak256, Hash32};

/// Block proposer message: `"block:" + hash`.
pub fn block_message(hash: &Hash32) -> String {
    format!("block:{}", hash.to_hex())
}

/// PoSe challenge message:
/// `"pose:challenge:" + challengeId + ":" + epochId + ":" + nodeId`.
pub fn pose_challenge_message(challenge_id: &str, epoch_id: u64, node_id: &str) -> String {
    format!("pose:challenge:{challenge_id}:{epoch_id}:{node_id}")
}

/// Hash of a receipt's response body: keccak-256 over the stable JSON
/// rendering (keys sorted recursively, big integers as decimal strings).
pub fn response_body_hash(body: &Value) -> Hash32 {
    keccak256(stable_stringify(body).as_bytes())
}

/// PoSe receipt message:
/// `"pose:receipt:" + challengeId + ":" + nodeId + ":" + bodyHash [":" + responseAtMs]`.
///
/// The timestamp suffix is optional for compatibility with receipts signed
/// before it was introduced; new receipts always carry it.
pub fn pose_receipt_message(
    challenge_id: &str,
    node_id: &str,
    body: &Value,
    response_at_ms: Option<u64>,
) -> String {
    let body_hash = response_body_hash(body).to_hex();
    match response_at_ms {
        Some(ts) => format!("pose:receipt:{challenge_id}:{node_id}:{body_hash}:{ts}"),
        None => format!("pose:receipt:{challenge_id}:{node_id}:{body_hash}"),
    }
}

/// P2P envelope message:
/// `"p2p:" + path + ":" + senderId + ":" + timestampMs + ":" + nonce + ":" + payloadHash`.
pub fn p2p_envelope_message(
    path: &str,
    sender_id: &str,
    timestamp_ms: u64,
    nonce: &str,
    payload: &Value,
) -> String {
    let payload_hash = keccak256(stable_stringify(payload).as_bytes()).to_hex();
    format!("p2p:{path}:{sender_id}:{timestamp_ms}:{nonce}:{payload_hash}")
}

/// P2P identity-proof message: `"p2p:identity:" + challenge + ":" + nodeId`.
///
/// The node id is lowercased before hashing so mixed-case peers cannot
/// produce two valid identities.
pub fn identity_message(challenge: &str, node_id: &str) -> String {
    format!("p2p:identity:{challenge}:{}", node_id.to_lowercase())
}
