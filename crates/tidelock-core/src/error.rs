use thiserror::Error;

use crate::types::{Timestamp, TokenId};

#[derive(Debug, Error)]
pub enum TidelockError {
    // ── Input validation ─────────────────────────────────────────────────────
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("rounds must be greater than zero")]
    ZeroRounds,

    #[error("the zero account is not a valid receiver")]
    ZeroAccount,

    #[error("batch operation requires at least one entry")]
    EmptyBatch,

    #[error("mismatched array lengths: {left} keys, {right} amounts")]
    MismatchedArrayLengths { left: usize, right: usize },

    #[error("lock index {index} out of range ({count} lock entries)")]
    InvalidLockIndex { index: usize, count: usize },

    #[error("timestamp {epoch} is not an epoch boundary")]
    UnalignedEpoch { epoch: Timestamp },

    #[error("asset not handled by this operation")]
    UnsupportedAsset,

    // ── Invariant guards ─────────────────────────────────────────────────────
    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },

    #[error(
        "insufficient redemption allowance under unlock time {unlock_time}: \
         requested {requested}, available {available}"
    )]
    InsufficientRedemptionAllowance {
        unlock_time: Timestamp,
        requested: u128,
        available: u128,
    },

    #[error("insufficient redemption-note balance at {unlock_time}: need {need}, have {have}")]
    InsufficientNoteBalance {
        unlock_time: Timestamp,
        need: u128,
        have: u128,
    },

    #[error("no snapshot balance for epoch {epoch}")]
    InsufficientSnapshotBalance { epoch: Timestamp },

    #[error("no futures-note balance for epoch {epoch}")]
    InsufficientFuturesBalance { epoch: Timestamp },

    #[error("redemption not yet unlocked (unlocks at {unlock_time})")]
    BeforeUnlock { unlock_time: Timestamp },

    #[error("stake not yet expired (expires at {expiry})")]
    BeforeStakingExpiry { expiry: Timestamp },

    #[error("reward already claimed for epoch {epoch}, index {reward_index}")]
    AlreadyClaimed { epoch: Timestamp, reward_index: u32 },

    #[error("maintenance required: no snapshot taken for epoch {epoch}")]
    SnapshotRequired { epoch: Timestamp },

    #[error("reward token {token} already recorded for this epoch")]
    DuplicateRewardToken { token: TokenId },

    #[error("reward index {index} out of range ({count} rewards this epoch)")]
    InvalidRewardIndex { index: u32, count: usize },

    #[error("epoch {epoch} has not fully elapsed")]
    EpochNotEnded { epoch: Timestamp },

    #[error("no record for epoch {epoch}")]
    NoSuchEpoch { epoch: Timestamp },

    // ── Operational ──────────────────────────────────────────────────────────
    #[error("engine is paused")]
    Paused,

    #[error("operation requires the engine to be paused")]
    NotPaused,

    #[error("caller is not authorized")]
    NotAuthorized,

    #[error("reentrant call rejected")]
    Reentrancy,

    #[error("no migration target set")]
    NoMigrationTarget,

    // ── Configuration ────────────────────────────────────────────────────────
    #[error("fee {value} exceeds cap {cap}")]
    FeeAboveCap { value: u128, cap: u128 },

    #[error("redemption fee bounds inverted: min {min} > max {max}")]
    FeeBoundsInverted { min: u128, max: u128 },

    #[error("config field `{0}` must not be the zero account")]
    ZeroConfigAccount(&'static str),

    #[error("delegation space must not be empty")]
    EmptyDelegationSpace,

    // ── External collaborators ───────────────────────────────────────────────
    #[error("reward proof rejected: {0}")]
    InvalidProof(String),

    #[error("lock gateway failure: {0}")]
    Gateway(String),

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}
