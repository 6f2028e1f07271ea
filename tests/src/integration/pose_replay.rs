//! PoSe replay prevention across a registry restart: the same challenge
//! tuple never verifies twice, even after reopening from disk.

use serde_json::json;

use coc_pose::{challenge_fingerprint, PoseError, ReceiptVerifier, VerifyContext};
use coc_storage::PersistentNonceLog;
use shared_crypto::{pose_challenge_message, pose_receipt_message, NodeSigner};
use shared_types::{Challenge, ChallengeType, PoseReceipt, QuerySpec};

fn fixture(challenger: &NodeSigner, node: &NodeSigner) -> (Challenge, PoseReceipt) {
    let mut challenge = Challenge {
        challenge_id: "ch-replay".into(),
        epoch_id: 7,
        node_id: node.node_id(),
        challenge_type: ChallengeType::Uptime,
        nonce: "nonce-replay".into(),
        rand_seed: "0x01".into(),
        issued_at_ms: 1_000,
        deadline_ms: 61_000,
        query_spec: QuerySpec::Uptime { tolerance: 5 },
        challenger_id: challenger.node_id(),
        challenger_sig: None,
    };
    let message = pose_challenge_message(
        &challenge.challenge_id,
        challenge.epoch_id,
        &challenge.node_id,
    );
    challenge.challenger_sig = Some(challenger.sign(&message).unwrap());

    let body = json!({"blockNumber": 50});
    let receipt_message =
        pose_receipt_message(&challenge.challenge_id, &challenge.node_id, &body, Some(2_000));
    let receipt = PoseReceipt {
        challenge_id: challenge.challenge_id.clone(),
        node_id: challenge.node_id.clone(),
        response_at_ms: 2_000,
        response_body: body,
        node_sig: node.sign(&receipt_message).unwrap(),
    };
    (challenge, receipt)
}

#[test]
fn consume_once_then_never_again_even_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nonce-registry.log");
    let challenger = NodeSigner::random();
    let node = NodeSigner::random();
    let (challenge, receipt) = fixture(&challenger, &node);
    let ctx = VerifyContext {
        expected_height: 50,
        now_ms: 2_000,
    };

    {
        let registry = PersistentNonceLog::open(&path, 0, 100_000, 0).unwrap();
        let verifier = ReceiptVerifier::new(&registry);
        // First consume succeeds, second fails.
        verifier.verify(&challenge, &receipt, &ctx).unwrap();
        assert!(matches!(
            verifier.verify(&challenge, &receipt, &ctx),
            Err(PoseError::Replay)
        ));
    }

    // After a restart the persisted registry still refuses the tuple.
    let reopened = PersistentNonceLog::open(&path, 0, 100_000, 3_000).unwrap();
    assert!(matches!(
        ReceiptVerifier::new(&reopened).verify(&challenge, &receipt, &ctx),
        Err(PoseError::Replay)
    ));
    // The fingerprint itself is stable across processes.
    assert!(reopened.contains(&challenge_fingerprint(&challenge).to_hex(), 3_000));
}

#[test]
fn fingerprint_covers_every_tuple_field() {
    let challenger = NodeSigner::random();
    let node = NodeSigner::random();
    let (challenge, _) = fixture(&challenger, &node);
    let base = challenge_fingerprint(&challenge);

    let mut other = challenge.clone();
    other.nonce = "different".into();
    assert_ne!(challenge_fingerprint(&other), base);

    let mut other = challenge.clone();
    other.epoch_id += 1;
    assert_ne!(challenge_fingerprint(&other), base);

    let mut other = challenge;
    other.challenge_type = ChallengeType::Storage;
    assert_ne!(challenge_fingerprint(&other), base);
}
