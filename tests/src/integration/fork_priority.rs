//! Fork-choice priority with the literal fixture: a BFT-finalized height-8
//! tip beats a non-finalized height-10 tip, and never the reverse.

use primitive_types::U256;

use coc_chain::{should_switch_fork, SwitchReason};
use shared_types::{ForkTip, Hash32};

fn tip(height: u64, bft: bool) -> ForkTip {
    ForkTip {
        height,
        hash: Hash32([height as u8; 32]),
        cumulative_weight: U256::from(height * 100),
        bft_finalized: bft,
    }
}

#[test]
fn bft_finalized_height_8_beats_plain_height_10() {
    let local = tip(10, false);
    let remote = tip(8, true);
    let reason = should_switch_fork(&local, &remote).unwrap();
    assert_eq!(reason, SwitchReason::BftFinality);
    assert_eq!(reason.as_str(), "bft-finality");

    // Reverse the flags: no switch.
    let local = tip(10, true);
    let remote = tip(8, false);
    assert_eq!(should_switch_fork(&local, &remote), None);
}

#[test]
fn switch_reasons_name_the_deciding_layer() {
    assert_eq!(
        should_switch_fork(&tip(5, false), &tip(6, false)),
        Some(SwitchReason::Height)
    );
    let local = ForkTip {
        cumulative_weight: U256::from(10u64),
        ..tip(5, false)
    };
    let remote = ForkTip {
        cumulative_weight: U256::from(20u64),
        hash: Hash32([0xEE; 32]),
        ..tip(5, false)
    };
    assert_eq!(
        should_switch_fork(&local, &remote),
        Some(SwitchReason::Weight)
    );
}
