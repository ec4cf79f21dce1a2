//! Redemption projections.
//!
//! Pure helpers that tooling uses to show a redeemer what a position will
//! cost before committing: the fee curve sampled at epoch boundaries, and a
//! full quote (fee, payout, futures rounds) for one lock entry.

use tidelock_core::config::FeeConfig;
use tidelock_core::epoch::futures_rounds;
use tidelock_core::fees::{fee_breakdown, redemption_fee_percent};
use tidelock_core::types::{Balance, Timestamp};
use tidelock_core::{EPOCH_DURATION, MAX_REDEMPTION_TIME};
use tidelock_gateway::LockEntry;

/// One sample of the exit-fee curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeePoint {
    /// Whole epochs remaining until unlock.
    pub epochs_remaining: u64,
    /// Fee in parts per `FEE_DENOMINATOR`.
    pub fee_percent: u128,
}

/// The fee curve sampled at every whole-epoch boundary, nearest first.
pub fn fee_preview(fees: &FeeConfig) -> Vec<FeePoint> {
    let epochs = (MAX_REDEMPTION_TIME / EPOCH_DURATION) as u64;
    (0..=epochs)
        .map(|epochs_remaining| FeePoint {
            epochs_remaining,
            fee_percent: redemption_fee_percent(
                epochs_remaining as Timestamp * EPOCH_DURATION,
                fees,
            ),
        })
        .collect()
}

/// Projected outcome of redeeming `assets` against one lock entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedemptionQuote {
    pub unlock_time: Timestamp,
    pub remaining: Timestamp,
    pub fee_percent: u128,
    pub fee_amount: Balance,
    pub post_fee_amount: Balance,
    /// Futures rounds that would be minted for the gross amount.
    pub rounds: u64,
}

pub fn quote_redemption(
    entry: &LockEntry,
    assets: Balance,
    fees: &FeeConfig,
    now: Timestamp,
) -> RedemptionQuote {
    let remaining = entry.unlock_time - now;
    let fee_percent = redemption_fee_percent(remaining, fees);
    let (fee_amount, post_fee_amount) = fee_breakdown(assets, fee_percent);
    RedemptionQuote {
        unlock_time: entry.unlock_time,
        remaining,
        fee_percent,
        fee_amount,
        post_fee_amount,
        rounds: futures_rounds(remaining),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelock_core::{DEFAULT_REDEMPTION_FEE_MAX, DEFAULT_REDEMPTION_FEE_MIN};

    #[test]
    fn preview_spans_the_whole_curve() {
        let preview = fee_preview(&FeeConfig::default());
        assert_eq!(preview.len(), 9, "epochs 0 through 8 inclusive");
        assert_eq!(preview[0].fee_percent, DEFAULT_REDEMPTION_FEE_MIN);
        assert_eq!(preview[8].fee_percent, DEFAULT_REDEMPTION_FEE_MAX);
    }

    #[test]
    fn preview_is_monotonic() {
        let preview = fee_preview(&FeeConfig::default());
        for pair in preview.windows(2) {
            assert!(pair[0].fee_percent <= pair[1].fee_percent);
        }
    }

    #[test]
    fn quote_matches_curve_and_rounds() {
        let entry = LockEntry {
            amount: 1_000_000,
            unlock_time: MAX_REDEMPTION_TIME,
        };
        let quote = quote_redemption(&entry, 100_000, &FeeConfig::default(), 0);
        assert_eq!(quote.fee_percent, DEFAULT_REDEMPTION_FEE_MAX);
        assert_eq!(quote.fee_amount, 5_000);
        assert_eq!(quote.post_fee_amount, 95_000);
        assert_eq!(quote.rounds, 8);
    }

    #[test]
    fn quote_for_matured_entry_pays_fee_min() {
        let entry = LockEntry {
            amount: 100,
            unlock_time: 1_000,
        };
        let quote = quote_redemption(&entry, 100, &FeeConfig::default(), 1_000);
        assert_eq!(quote.fee_percent, DEFAULT_REDEMPTION_FEE_MIN);
        assert_eq!(quote.rounds, 0);
    }
}
