//! In-process reference collaborators.
//!
//! These back the engine in tests and local tooling. They model the external
//! contracts' observable behavior only: a bucketed lock schedule, a fee sink
//! that records what it was paid, and a delegate registry.

use std::collections::BTreeMap;

use tidelock_core::epoch::epoch_of;
use tidelock_core::error::TidelockError;
use tidelock_core::types::{AccountId, Asset, Balance, Timestamp, TokenId};
use tidelock_core::MAX_REDEMPTION_TIME;

use crate::traits::{FeeSplitter, LockEntry, LockGateway, LockedBalances, VoteDelegateRegistry};

// ── MemoryLockGateway ────────────────────────────────────────────────────────

/// Lock facility with a 16-week schedule in epoch buckets.
///
/// Amounts locked within one epoch coalesce into a single entry unlocking
/// `MAX_REDEMPTION_TIME` after that epoch's start. Tests drive reward accrual
/// through [`MemoryLockGateway::accrue`].
#[derive(Debug, Default)]
pub struct MemoryLockGateway {
    /// unlock_time → locked amount.
    entries: BTreeMap<Timestamp, Balance>,
    /// Rewards accrued but not yet claimed, per token.
    pending_rewards: BTreeMap<TokenId, Balance>,
}

impl MemoryLockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: accrue `amount` of `token` as claimable rewards.
    pub fn accrue(&mut self, token: TokenId, amount: Balance) {
        *self.pending_rewards.entry(token).or_default() += amount;
    }
}

impl LockGateway for MemoryLockGateway {
    fn lock(&mut self, amount: Balance, now: Timestamp) -> Result<(), TidelockError> {
        if amount == 0 {
            return Ok(());
        }
        let unlock_time = epoch_of(now) + MAX_REDEMPTION_TIME;
        *self.entries.entry(unlock_time).or_default() += amount;
        Ok(())
    }

    fn process_expired_locks(&mut self, now: Timestamp) -> Result<Balance, TidelockError> {
        let expired: Vec<Timestamp> = self
            .entries
            .range(..=now)
            .map(|(t, _)| *t)
            .collect();
        let mut freed = 0;
        for t in expired {
            freed += self.entries.remove(&t).unwrap_or(0);
        }
        Ok(freed)
    }

    fn locked_balances(&self, now: Timestamp) -> Result<LockedBalances, TidelockError> {
        let mut balances = LockedBalances::default();
        for (&unlock_time, &amount) in &self.entries {
            balances.total += amount;
            if unlock_time <= now {
                balances.unlockable += amount;
            } else {
                balances.locked += amount;
                balances.entries.push(LockEntry { amount, unlock_time });
            }
        }
        Ok(balances)
    }

    fn claimable_rewards(&self) -> Result<Vec<(TokenId, Balance)>, TidelockError> {
        Ok(self
            .pending_rewards
            .iter()
            .map(|(&t, &a)| (t, a))
            .collect())
    }

    fn claim_rewards(&mut self) -> Result<Vec<(TokenId, Balance)>, TidelockError> {
        let claimed = self.claimable_rewards()?;
        self.pending_rewards.clear();
        Ok(claimed)
    }

    fn emergency_unlock(&mut self) -> Result<Balance, TidelockError> {
        let total = self.entries.values().sum();
        self.entries.clear();
        Ok(total)
    }
}

// ── MemoryFeeSplitter ────────────────────────────────────────────────────────

/// Fee sink recording cumulative distributions per asset.
#[derive(Debug, Default)]
pub struct MemoryFeeSplitter {
    totals: BTreeMap<Asset, Balance>,
}

impl MemoryFeeSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self, asset: Asset) -> Balance {
        self.totals.get(&asset).copied().unwrap_or(0)
    }
}

impl FeeSplitter for MemoryFeeSplitter {
    fn distribute(&mut self, asset: Asset, amount: Balance) -> Result<(), TidelockError> {
        *self.totals.entry(asset).or_default() += amount;
        Ok(())
    }
}

// ── MemoryDelegateRegistry ───────────────────────────────────────────────────

/// Namespace → delegate mapping.
#[derive(Debug, Default)]
pub struct MemoryDelegateRegistry {
    delegates: BTreeMap<String, AccountId>,
}

impl MemoryDelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delegate(&self, space: &str) -> Option<&AccountId> {
        self.delegates.get(space)
    }
}

impl VoteDelegateRegistry for MemoryDelegateRegistry {
    fn set_delegate(&mut self, space: &str, delegate: &AccountId) -> Result<(), TidelockError> {
        self.delegates.insert(space.to_string(), delegate.clone());
        Ok(())
    }

    fn clear_delegate(&mut self, space: &str) -> Result<(), TidelockError> {
        self.delegates.remove(space);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelock_core::EPOCH_DURATION;

    #[test]
    fn locks_coalesce_within_an_epoch() {
        let mut gw = MemoryLockGateway::new();
        gw.lock(10, 100).unwrap();
        gw.lock(5, 200).unwrap();
        let balances = gw.locked_balances(100).unwrap();
        assert_eq!(balances.entries.len(), 1);
        assert_eq!(balances.entries[0].amount, 15);
        assert_eq!(balances.entries[0].unlock_time, MAX_REDEMPTION_TIME);
    }

    #[test]
    fn locks_in_different_epochs_stay_separate() {
        let mut gw = MemoryLockGateway::new();
        gw.lock(10, 0).unwrap();
        gw.lock(5, EPOCH_DURATION).unwrap();
        let balances = gw.locked_balances(0).unwrap();
        assert_eq!(balances.entries.len(), 2);
        assert_eq!(balances.total, 15);
        assert_eq!(balances.locked, 15);
    }

    #[test]
    fn expired_locks_become_unlockable_then_freed() {
        let mut gw = MemoryLockGateway::new();
        gw.lock(10, 0).unwrap();
        let at_maturity = gw.locked_balances(MAX_REDEMPTION_TIME).unwrap();
        assert_eq!(at_maturity.unlockable, 10);
        assert_eq!(at_maturity.locked, 0);
        assert_eq!(gw.process_expired_locks(MAX_REDEMPTION_TIME).unwrap(), 10);
        assert_eq!(gw.locked_balances(MAX_REDEMPTION_TIME).unwrap().total, 0);
    }

    #[test]
    fn claim_rewards_drains_pending() {
        let mut gw = MemoryLockGateway::new();
        let token = TokenId::from_bytes([9u8; 32]);
        gw.accrue(token, 100);
        gw.accrue(token, 50);
        assert_eq!(gw.claimable_rewards().unwrap(), vec![(token, 150)]);
        assert_eq!(gw.claim_rewards().unwrap(), vec![(token, 150)]);
        assert!(gw.claimable_rewards().unwrap().is_empty());
    }

    #[test]
    fn emergency_unlock_ignores_schedule() {
        let mut gw = MemoryLockGateway::new();
        gw.lock(10, 0).unwrap();
        gw.lock(20, EPOCH_DURATION).unwrap();
        assert_eq!(gw.emergency_unlock().unwrap(), 30);
        assert_eq!(gw.locked_balances(0).unwrap().total, 0);
    }

    #[test]
    fn splitter_accumulates_per_asset() {
        let mut splitter = MemoryFeeSplitter::new();
        splitter.distribute(Asset::Receipt, 5).unwrap();
        splitter.distribute(Asset::Receipt, 7).unwrap();
        splitter.distribute(Asset::Base, 1).unwrap();
        assert_eq!(splitter.total(Asset::Receipt), 12);
        assert_eq!(splitter.total(Asset::Base), 1);
    }

    #[test]
    fn delegate_set_and_clear() {
        let mut registry = MemoryDelegateRegistry::new();
        let delegate = AccountId::from_bytes([3u8; 32]);
        registry.set_delegate("tidelock.eth", &delegate).unwrap();
        assert_eq!(registry.delegate("tidelock.eth"), Some(&delegate));
        registry.clear_delegate("tidelock.eth").unwrap();
        assert_eq!(registry.delegate("tidelock.eth"), None);
    }
}
