//! Block production end to end: parent links, hash preimages, the nonce
//! registry and mempool cleanup.

use shared_crypto::NodeSigner;
use shared_types::{Address, RawTransaction};

use crate::support::{signed_transfer, solo_engine, GWEI};

#[test]
fn chain_links_and_preimages_hold_across_blocks() {
    let signer = NodeSigner::random();
    let mut engine = solo_engine(signer);
    engine.init(0).unwrap();

    for i in 1..=6u64 {
        engine.propose_next_block(i * 10_000).unwrap().unwrap();
    }

    // parentHash chains and hashes match their preimages.
    for height in 2..=6u64 {
        let block = engine.index().block_by_height(height).unwrap().unwrap();
        let parent = engine.index().block_by_height(height - 1).unwrap().unwrap();
        assert_eq!(block.parent_hash, parent.hash);
        assert_eq!(block.compute_hash(), block.hash);
    }
    let genesis = engine.index().block_by_height(1).unwrap().unwrap();
    assert!(genesis.parent_hash.is_zero());
}

#[test]
fn applied_txs_are_registered_and_evicted_from_the_pool() {
    use primitive_types::U256;
    let node_signer = NodeSigner::random();
    let sender = NodeSigner::random();
    let sender_address = sender.address();

    let id = node_signer.node_id();
    let mut engine = crate::support::engine_with(
        node_signer,
        vec![id],
        None,
        vec![(sender_address, U256::from(1_000_000_000_000_000_000u64))],
    );
    engine.init(0).unwrap();

    let raw = signed_transfer(&sender, 0, 1234, 2 * GWEI);
    let hash = engine.add_raw_tx(&raw, 1_000).unwrap();
    assert!(engine.mempool().contains(&hash));

    let block = engine.propose_next_block(5_000).unwrap().unwrap();
    assert_eq!(block.txs.len(), 1);
    assert_eq!(block.gas_used, 21_000);

    // Registered as confirmed and gone from the pool.
    assert!(engine.index().is_tx_confirmed(&hash).unwrap());
    assert!(!engine.mempool().contains(&hash));
    // The receipt landed with the transfer accounted.
    let stored = engine.index().tx_by_hash(&hash).unwrap().unwrap();
    assert_eq!(stored.receipt.status, 1);
    assert_eq!(stored.receipt.from, sender_address);
    assert_eq!(engine.state().balance_of(&Address([0x99; 20])), U256::from(1234u64));

    // Resubmitting the confirmed tx is refused.
    let err = engine.add_raw_tx(&raw, 6_000).unwrap_err();
    assert_eq!(err.to_string(), "tx already confirmed");
}

#[test]
fn unsigned_txs_in_a_block_reject_the_block() {
    let node_signer = NodeSigner::random();
    let mut engine = solo_engine(node_signer);
    engine.init(0).unwrap();
    engine.propose_next_block(1_000).unwrap().unwrap();

    // Hand-build a block carrying an unsigned tx.
    let unsigned = RawTransaction {
        chain_id: 18_780,
        to: Some(Address([1u8; 20])),
        nonce: 0,
        value: primitive_types::U256::zero(),
        gas_limit: 21_000,
        gas_price: Some(primitive_types::U256::from(GWEI)),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        data: "0x".into(),
        signature: None,
    };
    let tip = engine.tip().unwrap().unwrap();
    let mut block = tip.clone();
    block.number = tip.number + 1;
    block.parent_hash = tip.hash;
    block.timestamp_ms = tip.timestamp_ms + 1;
    block.txs = vec![unsigned.encode_stable().unwrap()];
    block.cumulative_weight = Some(primitive_types::U256::from(block.number));
    block.hash = block.compute_hash();

    let err = engine
        .apply_block(block, coc_chain::ApplyOrigin::Gossip, tip.timestamp_ms + 10)
        .unwrap_err();
    assert!(err.to_string().contains("unsigned"));
    // Nothing advanced.
    assert_eq!(engine.tip().unwrap().unwrap().number, tip.number);
}
