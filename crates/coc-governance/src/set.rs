//! # Active Validator Set
//!
//! Stake ledger and basis-point voting power. Every mutation re-derives
//! voting power so the 10_000 bp budget holds at all times.

use primitive_types::U256;
use std::collections::HashMap;
use tracing::{info, warn};

use shared_types::{Address, Validator};

use crate::errors::GovernanceError;

/// Set-level limits.
#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    pub max_validators: usize,
    pub min_stake: U256,
    /// Strict approval threshold, percent of active stake.
    pub approval_percent: u64,
    /// Strict participation threshold, percent of active stake.
    pub participation_percent: u64,
    /// Epochs a proposal stays open before expiring.
    pub proposal_ttl_epochs: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            max_validators: 100,
            min_stake: U256::from(1u64),
            approval_percent: 67,
            participation_percent: 50,
            proposal_ttl_epochs: 24,
        }
    }
}

/// The validator ledger.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    config: GovernanceConfig,
    validators: HashMap<String, Validator>,
}

impl ValidatorSet {
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            config,
            validators: HashMap::new(),
        }
    }

    /// Seed the genesis set. Entries violating the minimum stake are
    /// rejected the same way later additions are.
    pub fn with_genesis(
        config: GovernanceConfig,
        genesis: Vec<Validator>,
    ) -> Result<Self, GovernanceError> {
        let mut set = Self::new(config);
        for validator in genesis {
            set.add(validator)?;
        }
        Ok(set)
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn get(&self, id: &str) -> Option<&Validator> {
        self.validators.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.validators.contains_key(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.validators.get(id).map(|v| v.active).unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.validators.values().filter(|v| v.active).count()
    }

    /// Active validators sorted by id; the stable order proposer selection
    /// walks.
    pub fn active_sorted(&self) -> Vec<&Validator> {
        let mut active: Vec<&Validator> =
            self.validators.values().filter(|v| v.active).collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    pub fn total_active_stake(&self) -> U256 {
        self.validators
            .values()
            .filter(|v| v.active)
            .fold(U256::zero(), |acc, v| acc + v.stake)
    }

    /// Stake of an active validator, zero otherwise.
    pub fn stake_of(&self, id: &str) -> U256 {
        self.validators
            .get(id)
            .filter(|v| v.active)
            .map(|v| v.stake)
            .unwrap_or_default()
    }

    pub fn address_of(&self, id: &str) -> Option<Address> {
        self.validators.get(id).map(|v| v.address)
    }

    // -------------------------------------------------------------------------
    // Mutations (all re-derive voting power)
    // -------------------------------------------------------------------------

    /// Add an active validator.
    pub fn add(&mut self, validator: Validator) -> Result<(), GovernanceError> {
        if self.validators.contains_key(&validator.id) {
            return Err(GovernanceError::DuplicateValidator(validator.id));
        }
        if self.active_count() >= self.config.max_validators {
            return Err(GovernanceError::SetFull(self.config.max_validators));
        }
        if validator.stake < self.config.min_stake {
            return Err(GovernanceError::StakeBelowMinimum);
        }
        info!(id = %validator.id, stake = %validator.stake, "validator added");
        self.validators.insert(validator.id.clone(), validator);
        self.recompute_power();
        Ok(())
    }

    /// Deactivate a validator (stake is retained for a later re-add).
    pub fn remove(&mut self, id: &str) -> Result<(), GovernanceError> {
        if !self.validators.contains_key(id) {
            return Err(GovernanceError::UnknownValidator(id.to_string()));
        }
        if self.is_active(id) && self.active_count() <= 1 {
            return Err(GovernanceError::LastValidator);
        }
        if let Some(validator) = self.validators.get_mut(id) {
            validator.active = false;
        }
        info!(id, "validator deactivated");
        self.recompute_power();
        Ok(())
    }

    /// Update a validator's stake.
    pub fn update_stake(&mut self, id: &str, stake: U256) -> Result<(), GovernanceError> {
        let validator = self
            .validators
            .get_mut(id)
            .ok_or_else(|| GovernanceError::UnknownValidator(id.to_string()))?;
        if stake < self.config.min_stake {
            return Err(GovernanceError::StakeBelowMinimum);
        }
        validator.stake = stake;
        self.recompute_power();
        Ok(())
    }

    /// Externally signaled slash: deduct stake directly; deactivate if the
    /// remainder is below the minimum (unless that would empty the set).
    pub fn slash(&mut self, id: &str, amount: U256) -> Result<U256, GovernanceError> {
        let min_stake = self.config.min_stake;
        let last_active = self.active_count() <= 1;
        let validator = self
            .validators
            .get_mut(id)
            .ok_or_else(|| GovernanceError::UnknownValidator(id.to_string()))?;
        validator.stake = validator.stake.saturating_sub(amount);
        let remaining = validator.stake;
        if remaining < min_stake && validator.active {
            if last_active {
                warn!(id, "slash left the last active validator under minimum stake");
            } else {
                validator.active = false;
                info!(id, remaining = %remaining, "validator deactivated by slash");
            }
        }
        self.recompute_power();
        Ok(remaining)
    }

    /// Re-derive basis-point voting power: active stake share of 10_000,
    /// rounded down (so the sum never exceeds the budget); zero when
    /// inactive.
    fn recompute_power(&mut self) {
        let total = self.total_active_stake();
        for validator in self.validators.values_mut() {
            validator.voting_power = if validator.active && !total.is_zero() {
                (validator.stake * U256::from(10_000u64) / total).as_u32()
            } else {
                0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn validator(id: &str, stake: u64) -> Validator {
        Validator {
            id: id.to_string(),
            address: Address([id.as_bytes().last().copied().unwrap_or(0); 20]),
            stake: U256::from(stake),
            joined_at_epoch: 0,
            active: true,
            voting_power: 0,
        }
    }

    fn three_equal() -> ValidatorSet {
        ValidatorSet::with_genesis(
            GovernanceConfig::default(),
            vec![
                validator("v1", 100),
                validator("v2", 100),
                validator("v3", 100),
            ],
        )
        .unwrap()
    }

    #[test]
    fn voting_power_sums_within_budget() {
        let set = three_equal();
        let sum: u32 = set.active_sorted().iter().map(|v| v.voting_power).sum();
        assert!(sum <= 10_000);
        // 100/300 rounds down to 3333 bp each.
        assert_eq!(set.get("v1").unwrap().voting_power, 3333);
    }

    #[test]
    fn inactive_validator_has_zero_power() {
        let mut set = three_equal();
        set.remove("v2").unwrap();
        assert_eq!(set.get("v2").unwrap().voting_power, 0);
        assert_eq!(set.active_count(), 2);
        assert_eq!(set.stake_of("v2"), U256::zero());
    }

    #[test]
    fn last_validator_is_protected() {
        let mut set = three_equal();
        set.remove("v1").unwrap();
        set.remove("v2").unwrap();
        assert_eq!(set.remove("v3"), Err(GovernanceError::LastValidator));
    }

    #[test]
    fn add_enforces_capacity_and_minimum() {
        let mut set = ValidatorSet::new(GovernanceConfig {
            max_validators: 1,
            min_stake: U256::from(10u64),
            ..Default::default()
        });
        assert_eq!(
            set.add(validator("small", 5)),
            Err(GovernanceError::StakeBelowMinimum)
        );
        set.add(validator("v1", 100)).unwrap();
        assert_eq!(set.add(validator("v2", 100)), Err(GovernanceError::SetFull(1)));
        assert_eq!(
            set.add(validator("v1", 100)),
            Err(GovernanceError::DuplicateValidator("v1".into()))
        );
    }

    #[test]
    fn slash_deducts_and_deactivates_below_minimum() {
        let mut set = ValidatorSet::with_genesis(
            GovernanceConfig {
                min_stake: U256::from(50u64),
                ..Default::default()
            },
            vec![validator("v1", 100), validator("v2", 100)],
        )
        .unwrap();
        let remaining = set.slash("v1", U256::from(60u64)).unwrap();
        assert_eq!(remaining, U256::from(40u64));
        assert!(!set.is_active("v1"));
        assert_eq!(set.get("v1").unwrap().voting_power, 0);
    }

    #[test]
    fn slash_never_empties_the_active_set() {
        let mut set = ValidatorSet::with_genesis(
            GovernanceConfig {
                min_stake: U256::from(50u64),
                ..Default::default()
            },
            vec![validator("v1", 100)],
        )
        .unwrap();
        set.slash("v1", U256::from(90u64)).unwrap();
        assert!(set.is_active("v1"));
        assert_eq!(set.active_count(), 1);
    }

    #[test]
    fn active_sorted_is_stable_by_id() {
        let set = ValidatorSet::with_genesis(
            GovernanceConfig::default(),
            vec![validator("v3", 1), validator("v1", 1), validator("v2", 1)],
        )
        .unwrap();
        let ids: Vec<&str> = set.active_sorted().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2", "v3"]);
    }
}
