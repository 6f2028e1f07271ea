//! # EIP-1559 Base Fee
//!
//! The base fee moves at most 1/8 per block toward the half-full gas
//! target. Everything is `U256`; the fee never drops below one wei so the
//! admission floor stays meaningful.

use primitive_types::U256;

use shared_types::BLOCK_GAS_LIMIT;

/// Base fee of the first block: 1 gwei.
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;

const ELASTICITY_DENOMINATOR: u64 = 8;

/// Derive the child's base fee from the parent's fee and gas usage.
pub fn next_base_fee(parent_base_fee: U256, parent_gas_used: u64) -> U256 {
    let target = BLOCK_GAS_LIMIT / 2;

    if parent_gas_used == target {
        return parent_base_fee;
    }

    if parent_gas_used > target {
        let delta_gas = U256::from(parent_gas_used - target);
        let delta = parent_base_fee * delta_gas
            / U256::from(target)
            / U256::from(ELASTICITY_DENOMINATOR);
        // A full block always moves the fee by at least one wei.
        parent_base_fee + delta.max(U256::one())
    } else {
        let delta_gas = U256::from(target - parent_gas_used);
        let delta = parent_base_fee * delta_gas
            / U256::from(target)
            / U256::from(ELASTICITY_DENOMINATOR);
        parent_base_fee.saturating_sub(delta).max(U256::one())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_full_block_keeps_the_fee() {
        let fee = U256::from(INITIAL_BASE_FEE);
        assert_eq!(next_base_fee(fee, BLOCK_GAS_LIMIT / 2), fee);
    }

    #[test]
    fn full_block_raises_by_an_eighth() {
        let fee = U256::from(INITIAL_BASE_FEE);
        let next = next_base_fee(fee, BLOCK_GAS_LIMIT);
        assert_eq!(next, fee + fee / 8);
    }

    #[test]
    fn empty_block_lowers_by_an_eighth() {
        let fee = U256::from(INITIAL_BASE_FEE);
        let next = next_base_fee(fee, 0);
        assert_eq!(next, fee - fee / 8);
    }

    #[test]
    fn fee_floors_at_one_wei() {
        let next = next_base_fee(U256::one(), 0);
        assert_eq!(next, U256::one());
    }

    #[test]
    fn full_blocks_always_move_the_fee() {
        // Even a tiny fee must rise on a full block.
        let next = next_base_fee(U256::from(2u64), BLOCK_GAS_LIMIT);
        assert!(next > U256::from(2u64));
    }
}
