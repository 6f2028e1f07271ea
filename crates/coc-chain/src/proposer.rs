//! # Proposer Selection
//!
//! Deterministic: every node derives the same proposer for a height. With
//! governance the draw is stake-weighted from the active set; without it, a
//! plain round-robin over the configured validator ids.

use primitive_types::U256;

use coc_governance::ValidatorSet;
use shared_types::keccak256;

/// The validator expected to propose at `height`.
///
/// Stake-weighted path: sort active validators by id, draw
/// `seed = keccak256(decimal height) mod totalStake` and walk the
/// cumulative stakes until the seed falls inside a validator's slice.
pub fn expected_proposer(
    height: u64,
    governance: Option<&ValidatorSet>,
    fallback: &[String],
) -> Option<String> {
    if let Some(set) = governance {
        let total = set.total_active_stake();
        if !total.is_zero() {
            let digest = keccak256(height.to_string().as_bytes());
            let seed = U256::from_big_endian(&digest.0) % total;
            let mut cumulative = U256::zero();
            for validator in set.active_sorted() {
                cumulative += validator.stake;
                if seed < cumulative {
                    return Some(validator.id.clone());
                }
            }
            // Unreachable with a non-zero total; fall through defensively.
        }
    }
    if fallback.is_empty() {
        return None;
    }
    let index = ((height - 1) % fallback.len() as u64) as usize;
    fallback.get(index).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use coc_governance::GovernanceConfig;
    use shared_types::{Address, Validator};

    fn set_of(stakes: &[(&str, u64)]) -> ValidatorSet {
        ValidatorSet::with_genesis(
            GovernanceConfig::default(),
            stakes
                .iter()
                .map(|(id, stake)| Validator {
                    id: id.to_string(),
                    address: Address([1u8; 20]),
                    stake: U256::from(*stake),
                    joined_at_epoch: 0,
                    active: true,
                    voting_power: 0,
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn round_robin_without_governance() {
        let validators: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(expected_proposer(1, None, &validators).unwrap(), "a");
        assert_eq!(expected_proposer(2, None, &validators).unwrap(), "b");
        assert_eq!(expected_proposer(3, None, &validators).unwrap(), "c");
        assert_eq!(expected_proposer(4, None, &validators).unwrap(), "a");
    }

    #[test]
    fn stake_weighted_draw_is_deterministic() {
        let set = set_of(&[("v1", 100), ("v2", 100), ("v3", 100)]);
        let p1 = expected_proposer(42, Some(&set), &[]).unwrap();
        let p2 = expected_proposer(42, Some(&set), &[]).unwrap();
        assert_eq!(p1, p2);
        assert!(set.is_active(&p1));
    }

    #[test]
    fn all_stake_selects_the_only_staker() {
        let set = set_of(&[("whale", 1_000)]);
        for height in 1..20 {
            assert_eq!(expected_proposer(height, Some(&set), &[]).unwrap(), "whale");
        }
    }

    #[test]
    fn heavy_staker_wins_more_heights() {
        let set = set_of(&[("heavy", 900), ("light", 100)]);
        let heavy_count = (1..=200u64)
            .filter(|h| expected_proposer(*h, Some(&set), &[]).unwrap() == "heavy")
            .count();
        // 90% of stake should carry a clear majority of the draws.
        assert!(heavy_count > 140, "heavy won only {heavy_count}/200");
    }

    #[test]
    fn empty_everything_yields_none() {
        assert_eq!(expected_proposer(1, None, &[]), None);
    }
}
