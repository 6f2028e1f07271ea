//! The empty-proposer round: three equal validators, quorum 201, a full
//! prepare/commit round finalizing an empty block through the engine.

use primitive_types::U256;

use coc_bft::{BftAction, BftConfig, BftCoordinator};
use coc_chain::ApplyOrigin;
use shared_crypto::NodeSigner;
use shared_types::{BftMessage, BftPhase};

use crate::support::{engine_with, three_validators};

#[test]
fn empty_proposer_round_finalizes_height_one() {
    let set = three_validators();
    assert_eq!(BftCoordinator::quorum_threshold(&set), U256::from(201u64));

    // The scheduled proposer for height 1 runs the round from its node.
    let proposer = coc_chain::expected_proposer(1, Some(&set), &[]).unwrap();
    let voters: Vec<String> = ["v1", "v2", "v3"]
        .iter()
        .map(|id| id.to_string())
        .filter(|id| *id != proposer)
        .collect();

    let signer = NodeSigner::random();
    let mut engine = engine_with(signer, Vec::new(), Some(set.clone()), Vec::new());
    engine.set_local_id(proposer.clone());

    // No txs queued: the candidate is an empty block at height 1.
    let candidate = engine.build_candidate_block(1_000).unwrap().unwrap();
    assert_eq!(candidate.number, 1);
    assert!(candidate.txs.is_empty());
    // Weight = stake of the proposer on top of an empty chain.
    assert_eq!(candidate.cumulative_weight, Some(U256::from(100u64)));

    let mut bft = BftCoordinator::new(BftConfig::default(), proposer);
    let hash = candidate.hash;

    // The proposer emits its own prepare at round start; 100 < 201 keeps
    // the round open.
    let actions = bft.start_round(candidate, 1, &set, 1_000).unwrap();
    assert!(matches!(&actions[0], BftAction::Broadcast(m) if m.phase == BftPhase::Prepare));
    assert_eq!(bft.prepare_stake(&set), U256::from(100u64));

    let vote = |phase, sender: &str| BftMessage {
        phase,
        height: 1,
        block_hash: hash,
        sender_id: sender.to_string(),
    };

    // Prepares from the other two: 300 >= 201 moves the round to commit.
    bft.handle_message(&vote(BftPhase::Prepare, &voters[0]), &set, 1_100);
    let actions = bft.handle_message(&vote(BftPhase::Prepare, &voters[1]), &set, 1_200);
    assert!(matches!(&actions[0], BftAction::Broadcast(m) if m.phase == BftPhase::Commit));

    // Commits from the other two finalize.
    bft.handle_message(&vote(BftPhase::Commit, &voters[0]), &set, 1_300);
    let actions = bft.handle_message(&vote(BftPhase::Commit, &voters[1]), &set, 1_400);
    let finalized = actions
        .iter()
        .find_map(|a| match a {
            BftAction::Finalize(block) => Some(block.clone()),
            _ => None,
        })
        .expect("commit quorum finalizes");

    // Both phases reached quorum for exactly the proposed hash.
    assert!(bft.prepare_stake(&set) >= U256::from(201u64));
    assert!(bft.commit_stake(&set) >= U256::from(201u64));
    assert_eq!(finalized.hash, hash);

    // The finalize callback applies the block with the trusted flag.
    let applied = engine
        .apply_block(*finalized, ApplyOrigin::BftFinalize, 1_500)
        .unwrap();
    assert!(applied.bft_finalized);
    let tip = engine.tip().unwrap().unwrap();
    assert_eq!(tip.number, 1);
    assert!(tip.bft_finalized);
}
