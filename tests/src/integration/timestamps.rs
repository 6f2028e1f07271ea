//! Block timestamp windows with the literal fixture values: parent at
//! 1_000_000 ms, equal timestamps rejected, one past accepted, two
//! minutes ahead rejected.

use coc_chain::{ApplyOrigin, ChainError};
use shared_crypto::NodeSigner;
use shared_types::ChainBlock;

use crate::support::solo_engine;

fn child_of(engine: &coc_chain::ChainEngine, timestamp_ms: u64) -> ChainBlock {
    engine
        .build_block_at(Vec::new(), timestamp_ms)
        .expect("candidate")
}

#[test]
fn timestamp_windows_around_a_million_ms_parent() {
    let signer = NodeSigner::random();
    let mut engine = solo_engine(signer);
    engine.init(0).unwrap();

    // Parent block at exactly 1_000_000 ms.
    let parent = engine.propose_next_block(1_000_000).unwrap().unwrap();
    assert_eq!(parent.timestamp_ms, 1_000_000);
    let now = 1_000_050;

    // Equal to the parent: "must be after parent".
    let equal = child_of(&engine, 1_000_000);
    let err = engine.apply_block(equal, ApplyOrigin::Gossip, now).unwrap_err();
    assert!(matches!(err, ChainError::Timestamp(ref m) if m.contains("after parent")));

    // Two minutes ahead of local wall clock: "too far in future".
    let future = child_of(&engine, now + 120_000);
    let err = engine.apply_block(future, ApplyOrigin::Gossip, now).unwrap_err();
    assert!(matches!(err, ChainError::Timestamp(ref m) if m.contains("future")));

    // One millisecond past the parent: accepted.
    let next = child_of(&engine, 1_000_001);
    engine.apply_block(next, ApplyOrigin::Gossip, now).unwrap();
    assert_eq!(engine.tip().unwrap().unwrap().timestamp_ms, 1_000_001);
}
