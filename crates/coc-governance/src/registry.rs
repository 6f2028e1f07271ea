//! # Side Registries
//!
//! Factions and the treasury ride along with governance: factions map
//! lowercased addresses to a faction name, and the treasury is a bigint
//! that only grows through positive deposits.

use primitive_types::U256;
use std::collections::HashMap;

use shared_types::Address;

use crate::errors::GovernanceError;

/// Faction assignments indexed by lowercased address.
#[derive(Debug, Default)]
pub struct FactionRegistry {
    by_address: HashMap<String, String>,
}

impl FactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, address: &Address, faction: &str) {
        self.by_address
            .insert(address.to_hex(), faction.to_string());
    }

    /// Assign by a raw id string; lowercased so lookups are case-insensitive.
    pub fn assign_raw(&mut self, address: &str, faction: &str) {
        self.by_address
            .insert(address.to_lowercase(), faction.to_string());
    }

    pub fn faction_of(&self, address: &str) -> Option<&str> {
        self.by_address
            .get(&address.to_lowercase())
            .map(String::as_str)
    }

    pub fn members_of(&self, faction: &str) -> Vec<&str> {
        self.by_address
            .iter()
            .filter(|(_, f)| f.as_str() == faction)
            .map(|(addr, _)| addr.as_str())
            .collect()
    }
}

/// The governance treasury. Monotonically increasing.
#[derive(Debug, Default)]
pub struct Treasury {
    balance: U256,
}

impl Treasury {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self) -> U256 {
        self.balance
    }

    /// Deposit a strictly positive amount.
    pub fn deposit(&mut self, amount: U256) -> Result<U256, GovernanceError> {
        if amount.is_zero() {
            return Err(GovernanceError::NonPositiveDeposit);
        }
        self.balance = self.balance.saturating_add(amount);
        Ok(self.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faction_lookup_is_case_insensitive() {
        let mut registry = FactionRegistry::new();
        registry.assign_raw("0xABCDEF", "north");
        assert_eq!(registry.faction_of("0xabcdef"), Some("north"));
        assert_eq!(registry.faction_of("0xABCDEF"), Some("north"));
        assert_eq!(registry.faction_of("0xother"), None);
    }

    #[test]
    fn reassignment_overwrites() {
        let mut registry = FactionRegistry::new();
        let addr = Address([1u8; 20]);
        registry.assign(&addr, "north");
        registry.assign(&addr, "south");
        assert_eq!(registry.faction_of(&addr.to_hex()), Some("south"));
        assert_eq!(registry.members_of("north").len(), 0);
    }

    #[test]
    fn treasury_only_grows() {
        let mut treasury = Treasury::new();
        assert_eq!(
            treasury.deposit(U256::zero()),
            Err(GovernanceError::NonPositiveDeposit)
        );
        treasury.deposit(U256::from(5u64)).unwrap();
        treasury.deposit(U256::from(10u64)).unwrap();
        assert_eq!(treasury.balance(), U256::from(15u64));
    }
}
