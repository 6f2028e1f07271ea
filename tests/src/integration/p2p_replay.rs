//! Envelope round-trip and replay laws: a signed envelope authenticates
//! its sender and payload; the same `(senderId, nonce)` pair fails the
//! second time and becomes valid again after the TTL.

use serde_json::json;

use coc_p2p::{AuthConfig, AuthEnvelope, AuthVerifier};
use coc_storage::PersistentNonceLog;
use shared_crypto::NodeSigner;
use shared_types::EnforcementMode;

fn verifier_with_ttl(dir: &tempfile::TempDir, ttl_ms: u64) -> AuthVerifier {
    let log = PersistentNonceLog::open(&dir.path().join("used-nonces.log"), ttl_ms, 100_000, 0)
        .unwrap();
    AuthVerifier::new(
        AuthConfig {
            mode: EnforcementMode::Enforce,
            ..Default::default()
        },
        log,
    )
}

#[test]
fn envelope_roundtrip_preserves_sender_and_payload() {
    let dir = tempfile::tempdir().unwrap();
    let verifier = verifier_with_ttl(&dir, 86_400_000);
    let signer = NodeSigner::random();

    let payload = json!({"rawTx": "0xdeadbeef"});
    let mut body = payload.clone();
    let envelope =
        AuthEnvelope::sign(&signer, "/p2p/gossip-tx", &payload, 10_000, "n-rt".into()).unwrap();
    envelope.attach(&mut body).unwrap();

    // Decode: same sender, same payload.
    let sender = verifier
        .verify("/p2p/gossip-tx", &mut body, 10_000)
        .unwrap()
        .expect("authenticated");
    assert_eq!(sender, signer.node_id());
    assert_eq!(body, payload);
}

#[test]
fn nonce_replays_within_ttl_and_recovers_after() {
    let dir = tempfile::tempdir().unwrap();
    let verifier = verifier_with_ttl(&dir, 5_000);
    let signer = NodeSigner::random();
    let payload = json!({"rawTx": "0x01"});

    let send = |verifier: &AuthVerifier, at: u64| {
        let mut body = payload.clone();
        let envelope =
            AuthEnvelope::sign(&signer, "/p2p/gossip-tx", &payload, at, "n-ttl".into()).unwrap();
        envelope.attach(&mut body).unwrap();
        verifier.verify("/p2p/gossip-tx", &mut body, at)
    };

    // First accepted, immediate replay refused.
    assert!(send(&verifier, 10_000).unwrap().is_some());
    assert!(send(&verifier, 10_100).is_err());
    // Past the TTL the same nonce is accepted again.
    assert!(send(&verifier, 15_100).unwrap().is_some());
}
