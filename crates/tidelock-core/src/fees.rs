//! Redemption fee curve and reward-split arithmetic.
//!
//! The exit fee rises linearly with the time remaining until unlock:
//!
//!   fee = fee_max - (fee_max - fee_min) * (MAX - min(remaining, MAX)) / MAX
//!
//! so a position with the whole lock ahead of it pays `fee_max` and one that
//! is already redeemable pays `fee_min`. Rewards are split so a futures note
//! dilutes snapshot holders exactly as if its holder's balance were still in
//! the snapshot supply.

use serde::{Deserialize, Serialize};

use crate::config::FeeConfig;
use crate::constants::{FEE_DENOMINATOR, MAX_REDEMPTION_TIME};
use crate::types::{Balance, Timestamp};

// ── Redemption fee curve ─────────────────────────────────────────────────────

/// Exit fee percentage (parts per `FEE_DENOMINATOR`) for a position with
/// `remaining` seconds until unlock. Clamped to `[fee_min, fee_max]`.
pub fn redemption_fee_percent(remaining: Timestamp, fees: &FeeConfig) -> u128 {
    let clamped = remaining.clamp(0, MAX_REDEMPTION_TIME) as u128;
    let spread = fees.redemption_fee_max - fees.redemption_fee_min;
    fees.redemption_fee_max - spread * (MAX_REDEMPTION_TIME as u128 - clamped)
        / MAX_REDEMPTION_TIME as u128
}

/// Fee taken from `assets` at `fee_percent`, and what remains.
pub fn fee_breakdown(assets: Balance, fee_percent: u128) -> (Balance, Balance) {
    let fee = assets * fee_percent / FEE_DENOMINATOR;
    (fee, assets - fee)
}

// ── Reward split ─────────────────────────────────────────────────────────────

/// Outcome of splitting one incoming reward amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSplit {
    /// Protocol cut, routed to the fee splitter.
    pub fee: Balance,
    /// Allocated to snapshot holders.
    pub snapshot: Balance,
    /// Allocated to reward-futures holders.
    pub futures: Balance,
}

impl RewardSplit {
    /// The amount that stays in the epoch's pools.
    pub fn distributable(&self) -> Balance {
        self.snapshot + self.futures
    }
}

/// Split `received` between the epoch's snapshot holders and its futures-note
/// holders, after the protocol cut.
///
/// The futures supply joins the snapshot supply in the denominator: a futures
/// note stands in for a balance that left the snapshot, not for a share of an
/// independent pool.
pub fn split_reward(
    received: Balance,
    reward_fee: u128,
    snapshot_supply: Balance,
    futures_supply: Balance,
) -> RewardSplit {
    let fee = received * reward_fee / FEE_DENOMINATOR;
    let distributable = received - fee;

    let snapshot = if futures_supply == 0 {
        distributable
    } else if snapshot_supply == 0 {
        0
    } else {
        distributable * snapshot_supply / (snapshot_supply + futures_supply)
    };

    RewardSplit {
        fee,
        snapshot,
        futures: distributable - snapshot,
    }
}
