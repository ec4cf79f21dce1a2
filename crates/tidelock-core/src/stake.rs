use serde::{Deserialize, Serialize};

use crate::types::{Balance, Timestamp};

/// Share-accounting pool for one stake expiry.
///
/// Each expiry is its own isolated pool, so entrants targeting different
/// maturities never dilute each other. Nothing currently accrues to a pool,
/// which keeps the share price at 1:1, but redemptions go through the share
/// price regardless.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakePool {
    /// Expiry timestamp (the pool's key); always an epoch boundary.
    pub expiry: Timestamp,
    pub total_shares: Balance,
    pub total_assets: Balance,
}

impl StakePool {
    pub fn new(expiry: Timestamp) -> Self {
        Self {
            expiry,
            total_shares: 0,
            total_assets: 0,
        }
    }

    /// Shares minted for depositing `assets`. First deposit mints 1:1.
    pub fn shares_for_deposit(&self, assets: Balance) -> Balance {
        if self.total_shares == 0 {
            assets
        } else {
            assets * self.total_shares / self.total_assets
        }
    }

    /// Assets paid out for burning `shares` at the current share price.
    pub fn assets_for_shares(&self, shares: Balance) -> Balance {
        if self.total_shares == 0 {
            0
        } else {
            shares * self.total_assets / self.total_shares
        }
    }

    pub fn deposit(&mut self, assets: Balance) -> Balance {
        let shares = self.shares_for_deposit(assets);
        self.total_shares += shares;
        self.total_assets += assets;
        shares
    }

    pub fn withdraw(&mut self, shares: Balance) -> Balance {
        let assets = self.assets_for_shares(shares);
        self.total_shares -= shares;
        self.total_assets -= assets;
        assets
    }
}
