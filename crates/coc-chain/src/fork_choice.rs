//! # Fork Choice
//!
//! A total order over candidate chain tips: BFT finality first, then
//! height, then cumulative weight, then the lowercase tip hash as the
//! deterministic tiebreak (the lexicographically smaller hash wins, so
//! every node breaks ties the same way). A switch happens only when the
//! remote tip strictly dominates the local one.

use std::cmp::Ordering;

use shared_types::ForkTip;

/// Why a switch decision fired; the first layer that dominated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    BftFinality,
    Height,
    Weight,
    TiebreakHash,
}

impl SwitchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchReason::BftFinality => "bft-finality",
            SwitchReason::Height => "height",
            SwitchReason::Weight => "weight",
            SwitchReason::TiebreakHash => "tiebreak-hash",
        }
    }
}

/// Total order: `Greater` means `a` is the preferable tip.
pub fn compare_forks(a: &ForkTip, b: &ForkTip) -> Ordering {
    match (a.bft_finalized, b.bft_finalized) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    match a.height.cmp(&b.height) {
        Ordering::Equal => {}
        other => return other,
    }
    match a.cumulative_weight.cmp(&b.cumulative_weight) {
        Ordering::Equal => {}
        other => return other,
    }
    // Lowercase hex order equals byte order; the smaller hash is preferred.
    b.hash.cmp(&a.hash)
}

/// Switch only when `remote` strictly dominates `local`; returns the layer
/// that decided.
pub fn should_switch_fork(local: &ForkTip, remote: &ForkTip) -> Option<SwitchReason> {
    if compare_forks(remote, local) != Ordering::Greater {
        return None;
    }
    Some(if remote.bft_finalized != local.bft_finalized {
        SwitchReason::BftFinality
    } else if remote.height != local.height {
        SwitchReason::Height
    } else if remote.cumulative_weight != local.cumulative_weight {
        SwitchReason::Weight
    } else {
        SwitchReason::TiebreakHash
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use shared_types::Hash32;

    fn tip(height: u64, weight: u64, bft: bool, hash_byte: u8) -> ForkTip {
        ForkTip {
            height,
            hash: Hash32([hash_byte; 32]),
            cumulative_weight: U256::from(weight),
            bft_finalized: bft,
        }
    }

    #[test]
    fn bft_finality_beats_height() {
        let local = tip(10, 1000, false, 1);
        let remote = tip(8, 800, true, 2);
        assert_eq!(
            should_switch_fork(&local, &remote),
            Some(SwitchReason::BftFinality)
        );
        // Reverse the flags: the shorter tip no longer dominates.
        let local = tip(10, 1000, true, 1);
        let remote = tip(8, 800, false, 2);
        assert_eq!(should_switch_fork(&local, &remote), None);
    }

    #[test]
    fn height_beats_weight() {
        let local = tip(5, 9_999, false, 1);
        let remote = tip(6, 10, false, 2);
        assert_eq!(should_switch_fork(&local, &remote), Some(SwitchReason::Height));
    }

    #[test]
    fn weight_breaks_equal_heights() {
        let local = tip(5, 100, false, 1);
        let remote = tip(5, 200, false, 2);
        assert_eq!(should_switch_fork(&local, &remote), Some(SwitchReason::Weight));
    }

    #[test]
    fn hash_breaks_full_ties_deterministically() {
        let local = tip(5, 100, false, 0x22);
        let remote = tip(5, 100, false, 0x11);
        assert_eq!(
            should_switch_fork(&local, &remote),
            Some(SwitchReason::TiebreakHash)
        );
        assert_eq!(should_switch_fork(&remote, &local), None);
    }

    #[test]
    fn identical_tips_never_switch() {
        let t = tip(5, 100, false, 7);
        assert_eq!(should_switch_fork(&t, &t), None);
        assert_eq!(compare_forks(&t, &t), Ordering::Equal);
    }

    #[test]
    fn order_is_antisymmetric_and_transitive() {
        let tips = [
            tip(1, 1, false, 9),
            tip(2, 1, false, 8),
            tip(2, 5, false, 7),
            tip(2, 5, false, 3),
            tip(2, 5, true, 6),
            tip(9, 1, true, 5),
        ];
        for a in &tips {
            for b in &tips {
                assert_eq!(compare_forks(a, b), compare_forks(b, a).reverse());
                for c in &tips {
                    if compare_forks(a, b) == Ordering::Greater
                        && compare_forks(b, c) == Ordering::Greater
                    {
                        assert_eq!(compare_forks(a, c), Ordering::Greater);
                    }
                }
            }
        }
    }
}
