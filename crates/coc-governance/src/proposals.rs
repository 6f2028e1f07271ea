//! # Governance Proposals
//!
//! Stake-weighted voting over set changes. All arithmetic is `U256` over
//! active stake; percentages never go through floats and thresholds are
//! crossed strictly.
//!
//! A proposal finalizes when:
//! - approving stake strictly exceeds the approval share of total active
//!   stake (approved outright), or
//! - voted stake strictly exceeds the participation share *and* approving
//!   stake strictly exceeds the approval share of the votes cast, or
//! - every active validator has voted (approved on the cast-vote test,
//!   rejected otherwise), or
//! - the expiry epoch passes while still pending (expired).

use primitive_types::U256;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use shared_types::{Address, Proposal, ProposalKind, ProposalStatus, Validator};

use crate::errors::GovernanceError;
use crate::set::ValidatorSet;

/// Result of a vote or tick for one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// The open and settled proposals.
#[derive(Debug, Default)]
pub struct ProposalBook {
    proposals: HashMap<String, Proposal>,
}

impl ProposalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Pending)
    }

    /// Open a proposal. The proposer must be an active validator.
    pub fn propose(
        &mut self,
        set: &ValidatorSet,
        kind: ProposalKind,
        target_id: String,
        target_address: Option<Address>,
        target_stake: Option<U256>,
        proposer_id: &str,
        current_epoch: u64,
    ) -> Result<String, GovernanceError> {
        if !set.is_active(proposer_id) {
            return Err(GovernanceError::NotAValidator(proposer_id.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        let proposal = Proposal {
            id: id.clone(),
            kind,
            target_id,
            target_address,
            target_stake,
            proposer_id: proposer_id.to_string(),
            created_at_epoch: current_epoch,
            expires_at_epoch: current_epoch + set.config().proposal_ttl_epochs,
            votes: Default::default(),
            status: ProposalStatus::Pending,
        };
        info!(id = %id, kind = ?kind, "proposal opened");
        self.proposals.insert(id.clone(), proposal);
        Ok(id)
    }

    /// Record a vote and finalize if a threshold crossed. An approved
    /// proposal is executed against the set immediately.
    pub fn vote(
        &mut self,
        set: &mut ValidatorSet,
        proposal_id: &str,
        voter_id: &str,
        approve: bool,
    ) -> Result<ProposalOutcome, GovernanceError> {
        if !set.is_active(voter_id) {
            return Err(GovernanceError::NotAValidator(voter_id.to_string()));
        }
        let proposal = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| GovernanceError::UnknownProposal(proposal_id.to_string()))?;
        if proposal.status != ProposalStatus::Pending {
            return Err(GovernanceError::ProposalClosed);
        }
        proposal.votes.insert(voter_id.to_string(), approve);

        let outcome = Self::tally(proposal, set);
        match outcome {
            ProposalOutcome::Approved => {
                proposal.status = ProposalStatus::Approved;
                let proposal = proposal.clone();
                if let Err(e) = execute(&proposal, set) {
                    // Preconditions are re-checked at execution; a stale
                    // proposal simply fails here without poisoning the set.
                    warn!(id = %proposal.id, error = %e, "approved proposal not executable");
                }
            }
            ProposalOutcome::Rejected => proposal.status = ProposalStatus::Rejected,
            _ => {}
        }
        Ok(outcome)
    }

    /// Expire pending proposals whose window has passed.
    pub fn tick(&mut self, current_epoch: u64) -> Vec<String> {
        let mut expired = Vec::new();
        for proposal in self.proposals.values_mut() {
            if proposal.status == ProposalStatus::Pending
                && current_epoch > proposal.expires_at_epoch
            {
                proposal.status = ProposalStatus::Expired;
                expired.push(proposal.id.clone());
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "proposals expired");
        }
        expired
    }

    /// Stake-weighted tally. Votes from since-deactivated validators weigh
    /// nothing.
    fn tally(proposal: &Proposal, set: &ValidatorSet) -> ProposalOutcome {
        let total = set.total_active_stake();
        if total.is_zero() {
            return ProposalOutcome::Pending;
        }
        let hundred = U256::from(100u64);
        let approval_pct = U256::from(set.config().approval_percent);
        let participation_pct = U256::from(set.config().participation_percent);

        let mut yes = U256::zero();
        let mut voted = U256::zero();
        for (voter, approve) in &proposal.votes {
            let stake = set.stake_of(voter);
            voted += stake;
            if *approve {
                yes += stake;
            }
        }

        // Outright approval: yes stake crosses the share of ALL active stake.
        if yes * hundred > total * approval_pct {
            return ProposalOutcome::Approved;
        }

        let everyone_voted = set
            .active_sorted()
            .iter()
            .all(|v| proposal.votes.contains_key(&v.id));
        let cast_supermajority = !voted.is_zero() && yes * hundred > voted * approval_pct;

        if everyone_voted {
            return if cast_supermajority {
                ProposalOutcome::Approved
            } else {
                ProposalOutcome::Rejected
            };
        }

        // Early finalize once participation crosses and the cast votes carry
        // a supermajority.
        if voted * hundred > total * participation_pct && cast_supermajority {
            return ProposalOutcome::Approved;
        }

        ProposalOutcome::Pending
    }
}

/// Apply an approved proposal. Preconditions (capacity, last-validator
/// protection, minimum stake) are re-checked here, so execution is
/// idempotent and safe against stale proposals.
pub fn execute(proposal: &Proposal, set: &mut ValidatorSet) -> Result<(), GovernanceError> {
    match proposal.kind {
        ProposalKind::AddValidator => {
            if set.contains(&proposal.target_id) {
                // Already present: idempotent no-op.
                return Ok(());
            }
            let address = proposal
                .target_address
                .ok_or_else(|| GovernanceError::UnknownValidator(proposal.target_id.clone()))?;
            let stake = proposal.target_stake.unwrap_or_default();
            set.add(Validator {
                id: proposal.target_id.clone(),
                address,
                stake,
                joined_at_epoch: proposal.created_at_epoch,
                active: true,
                voting_power: 0,
            })
        }
        ProposalKind::RemoveValidator => {
            if !set.is_active(&proposal.target_id) {
                return Ok(());
            }
            set.remove(&proposal.target_id)
        }
        ProposalKind::UpdateStake => {
            let stake = proposal
                .target_stake
                .ok_or_else(|| GovernanceError::StakeBelowMinimum)?;
            if set.get(&proposal.target_id).map(|v| v.stake) == Some(stake) {
                return Ok(());
            }
            set.update_stake(&proposal.target_id, stake)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::GovernanceConfig;

    fn validator(id: &str, stake: u64) -> Validator {
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

    fn open_add(book: &mut ProposalBook, set: &ValidatorSet) -> String {
        book.propose(
            set,
            ProposalKind::AddValidator,
            "v4".into(),
            Some(Address([4u8; 20])),
            Some(U256::from(100u64)),
            "v1",
            0,
        )
        .unwrap()
    }

    #[test]
    fn two_of_three_does_not_cross_67_percent() {
        let mut set = three_equal();
        let mut book = ProposalBook::new();
        let id = open_add(&mut book, &set);
        assert_eq!(
            book.vote(&mut set, &id, "v1", true).unwrap(),
            ProposalOutcome::Pending
        );
        // 200/300 = 66.67%: not strictly over 67.
        assert_eq!(
            book.vote(&mut set, &id, "v2", true).unwrap(),
            ProposalOutcome::Pending
        );
        // Third yes crosses outright and executes the add.
        assert_eq!(
            book.vote(&mut set, &id, "v3", true).unwrap(),
            ProposalOutcome::Approved
        );
        assert!(set.is_active("v4"));
    }

    #[test]
    fn everyone_voted_but_approval_short_rejects() {
        let mut set = three_equal();
        let mut book = ProposalBook::new();
        let id = open_add(&mut book, &set);
        book.vote(&mut set, &id, "v1", true).unwrap();
        book.vote(&mut set, &id, "v2", false).unwrap();
        let outcome = book.vote(&mut set, &id, "v3", false).unwrap();
        assert_eq!(outcome, ProposalOutcome::Rejected);
        assert!(!set.contains("v4"));
    }

    #[test]
    fn unequal_stake_can_approve_early() {
        // v1 holds 80% of stake; its single yes crosses 67% outright.
        let mut set = ValidatorSet::with_genesis(
            GovernanceConfig::default(),
            vec![validator("v1", 800), validator("v2", 100), validator("v3", 100)],
        )
        .unwrap();
        let mut book = ProposalBook::new();
        let id = open_add(&mut book, &set);
        assert_eq!(
            book.vote(&mut set, &id, "v1", true).unwrap(),
            ProposalOutcome::Approved
        );
    }

    #[test]
    fn expiry_transitions_pending_to_expired() {
        let mut set = three_equal();
        let mut book = ProposalBook::new();
        let id = open_add(&mut book, &set);
        book.vote(&mut set, &id, "v1", true).unwrap();
        let ttl = set.config().proposal_ttl_epochs;
        assert!(book.tick(ttl).is_empty());
        let expired = book.tick(ttl + 1);
        assert_eq!(expired, vec![id.clone()]);
        assert_eq!(book.get(&id).unwrap().status, ProposalStatus::Expired);
        // Closed proposals refuse further votes.
        assert_eq!(
            book.vote(&mut set, &id, "v2", true),
            Err(GovernanceError::ProposalClosed)
        );
    }

    #[test]
    fn non_validator_cannot_propose_or_vote() {
        let mut set = three_equal();
        let mut book = ProposalBook::new();
        assert!(matches!(
            book.propose(
                &set,
                ProposalKind::RemoveValidator,
                "v1".into(),
                None,
                None,
                "stranger",
                0,
            ),
            Err(GovernanceError::NotAValidator(_))
        ));
        let id = open_add(&mut book, &set);
        assert!(matches!(
            book.vote(&mut set, &id, "stranger", true),
            Err(GovernanceError::NotAValidator(_))
        ));
    }

    #[test]
    fn execution_is_idempotent_and_rechecks_preconditions() {
        let mut set = three_equal();
        let proposal = Proposal {
            id: "p".into(),
            kind: ProposalKind::AddValidator,
            target_id: "v4".into(),
            target_address: Some(Address([4u8; 20])),
            target_stake: Some(U256::from(100u64)),
            proposer_id: "v1".into(),
            created_at_epoch: 0,
            expires_at_epoch: 10,
            votes: Default::default(),
            status: ProposalStatus::Approved,
        };
        execute(&proposal, &mut set).unwrap();
        // Second execution is a no-op, not a duplicate error.
        execute(&proposal, &mut set).unwrap();
        assert_eq!(set.active_count(), 4);

        // A stale removal for the last validator fails cleanly.
        let mut lone = ValidatorSet::with_genesis(
            GovernanceConfig::default(),
            vec![validator("only", 10)],
        )
        .unwrap();
        let removal = Proposal {
            kind: ProposalKind::RemoveValidator,
            target_id: "only".into(),
            ..proposal
        };
        assert_eq!(
            execute(&removal, &mut lone),
            Err(GovernanceError::LastValidator)
        );
    }
}
