/// ─── Tidelock Protocol Constants ────────────────────────────────────────────
///
/// The engine accounts in fixed two-week epochs. The underlying locking
/// facility holds deposits for eight epochs, which bounds both the redemption
/// wait and the exit-fee curve.

// ── Epochs ───────────────────────────────────────────────────────────────────

/// Epoch length in seconds (14 days). All epoch keys are multiples of this.
pub const EPOCH_DURATION: i64 = 14 * 24 * 3600;

/// Longest possible wait between initiating a redemption and its unlock:
/// the full lock duration of the underlying facility (8 epochs / 16 weeks).
pub const MAX_REDEMPTION_TIME: i64 = 8 * EPOCH_DURATION;

// ── Fees ─────────────────────────────────────────────────────────────────────

/// Fee percentages are expressed in parts per FEE_DENOMINATOR.
pub const FEE_DENOMINATOR: u128 = 1_000_000;

/// Default exit fee at the top of the curve (5%), paid when the full
/// MAX_REDEMPTION_TIME remains.
pub const DEFAULT_REDEMPTION_FEE_MAX: u128 = 50_000;

/// Default exit fee at the bottom of the curve (3%), paid when the position
/// is already redeemable.
pub const DEFAULT_REDEMPTION_FEE_MIN: u128 = 30_000;

/// Default protocol cut on incoming rewards (none).
pub const DEFAULT_REWARD_FEE: u128 = 0;

/// Hard cap on any configured redemption fee (10%).
pub const REDEMPTION_FEE_CAP: u128 = 100_000;

/// Hard cap on the configured reward fee (20%).
pub const REWARD_FEE_CAP: u128 = 200_000;

// ── Delegation ───────────────────────────────────────────────────────────────

/// Default vote-delegation namespace registered with the delegate registry.
pub const DEFAULT_DELEGATION_SPACE: &str = "tidelock.eth";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_redemption_time_is_whole_epochs() {
        assert_eq!(MAX_REDEMPTION_TIME % EPOCH_DURATION, 0);
        assert_eq!(MAX_REDEMPTION_TIME / EPOCH_DURATION, 8);
    }

    #[test]
    fn default_fees_within_caps() {
        assert!(DEFAULT_REDEMPTION_FEE_MAX <= REDEMPTION_FEE_CAP);
        assert!(DEFAULT_REDEMPTION_FEE_MIN <= DEFAULT_REDEMPTION_FEE_MAX);
        assert!(DEFAULT_REWARD_FEE <= REWARD_FEE_CAP);
    }
}
