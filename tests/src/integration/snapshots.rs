//! Fast-sync paths: chain snapshot adoption, and the state snapshot
//! export/import jump with derived finality flags.

use primitive_types::U256;

use coc_state::{StateSnapshot, StateStore};
use coc_storage::MemoryKv;
use shared_crypto::NodeSigner;
use shared_types::Address;
use std::sync::Arc;

use crate::support::{engine_with, signed_transfer, solo_engine, GWEI};

#[test]
fn follower_adopts_a_proposers_snapshot_incrementally() {
    // Both engines share the same validator identity (one proposer, one
    // follower replica of it).
    let signer = NodeSigner::random();
    let follower_signer = NodeSigner::from_hex(&signer.to_hex()).unwrap();

    let mut proposer = solo_engine(signer);
    proposer.init(0).unwrap();
    for i in 1..=5u64 {
        proposer.propose_next_block(i * 10_000).unwrap().unwrap();
    }
    let snapshot = proposer.chain_snapshot(32).unwrap().unwrap();
    assert_eq!(snapshot.height, 5);

    let id = follower_signer.node_id();
    let mut follower = engine_with(follower_signer, vec![id], None, Vec::new());
    follower.init(0).unwrap();
    let applied = follower
        .maybe_adopt_snapshot(&snapshot.blocks, 60_000)
        .unwrap();
    assert_eq!(applied, 5);
    assert_eq!(follower.tip().unwrap().unwrap().hash, snapshot.tip_hash);

    // Re-offering the same snapshot is a no-op.
    assert_eq!(
        follower.maybe_adopt_snapshot(&snapshot.blocks, 70_000).unwrap(),
        0
    );
}

#[test]
fn snap_sync_jump_derives_finality_locally() {
    let signer = NodeSigner::random();
    let sender = NodeSigner::random();
    let id = signer.node_id();
    let follower_signer = NodeSigner::from_hex(&signer.to_hex()).unwrap();

    let mut source = engine_with(
        signer,
        vec![id.clone()],
        None,
        vec![(sender.address(), U256::from(10_000_000_000_000u64))],
    );
    source.init(0).unwrap();
    source
        .add_raw_tx(&signed_transfer(&sender, 0, 777, 2 * GWEI), 500)
        .unwrap();
    for i in 1..=6u64 {
        source.propose_next_block(i * 10_000).unwrap().unwrap();
    }
    let chain = source.chain_snapshot(32).unwrap().unwrap();
    let state = source.export_state_snapshot().unwrap().unwrap();

    // Remote flags must never be trusted: poison one.
    let mut blocks = chain.blocks.clone();
    for block in &mut blocks {
        block.bft_finalized = true;
    }

    let mut fresh = engine_with(follower_signer, vec![id], None, Vec::new());
    fresh.init(0).unwrap();
    let root = fresh.import_state_snapshot(&state).unwrap();
    assert_eq!(root, state.state_root);
    let imported = fresh.import_snap_sync_blocks(&blocks, Some(root)).unwrap();
    assert_eq!(imported, 6);

    // Finality is depth-derived (depth 3 on a 6-high tip), and the wire's
    // bft flags were discarded.
    let tip = fresh.tip().unwrap().unwrap();
    assert_eq!(tip.number, 6);
    assert!(!tip.bft_finalized);
    assert!(fresh.index().block_by_height(3).unwrap().unwrap().finalized);
    assert!(!fresh.index().block_by_height(4).unwrap().unwrap().finalized);

    // The transferred balance arrived through the state snapshot.
    assert_eq!(
        fresh.state().balance_of(&Address([0x99; 20])),
        U256::from(777u64)
    );
    // Included tx hashes were registered for replay prevention.
    let raw = signed_transfer(&sender, 0, 777, 2 * GWEI);
    assert_eq!(
        fresh.add_raw_tx(&raw, 100_000).unwrap_err().to_string(),
        "tx already confirmed"
    );
}

#[test]
fn state_snapshot_serde_roundtrip_is_lossless() {
    let mut store = StateStore::open(Arc::new(MemoryKv::new())).unwrap();
    store.credit(Address([1u8; 20]), U256::from(5u64));
    store.commit().unwrap();
    let snapshot = StateSnapshot::export(&store, 2, shared_types::Hash32([2u8; 32])).unwrap();

    let value = serde_json::to_value(&snapshot).unwrap();
    let back = StateSnapshot::deserialize(&value).unwrap();
    assert_eq!(back.version, snapshot.version);
    assert_eq!(back.state_root, snapshot.state_root);
    assert_eq!(back.block_height, snapshot.block_height);
    assert_eq!(back.accounts, snapshot.accounts);
}
