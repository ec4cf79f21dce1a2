use tidelock_core::error::TidelockError;
use tidelock_core::types::{AccountId, Asset, Balance, Timestamp, TokenId};

// ── Lock gateway ─────────────────────────────────────────────────────────────

/// One entry in the gateway's lock schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockEntry {
    pub amount: Balance,
    pub unlock_time: Timestamp,
}

/// Snapshot of the gateway's holdings for its sole depositor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockedBalances {
    /// locked + unlockable.
    pub total: Balance,
    /// Matured but not yet withdrawn.
    pub unlockable: Balance,
    /// Still inside the lock schedule.
    pub locked: Balance,
    /// Outstanding entries ordered by unlock time.
    pub entries: Vec<LockEntry>,
}

/// The external time-locked, reward-accruing facility holding the pooled
/// base asset. The engine is its sole authorized caller; return values are
/// untrusted but deterministic (a claim yielding zero is valid).
pub trait LockGateway {
    /// Lock `amount` into the schedule bucket for the current epoch.
    fn lock(&mut self, amount: Balance, now: Timestamp) -> Result<(), TidelockError>;

    /// Withdraw every matured entry; returns the freed amount.
    fn process_expired_locks(&mut self, now: Timestamp) -> Result<Balance, TidelockError>;

    fn locked_balances(&self, now: Timestamp) -> Result<LockedBalances, TidelockError>;

    /// Rewards accrued to the depositor and not yet claimed.
    fn claimable_rewards(&self) -> Result<Vec<(TokenId, Balance)>, TidelockError>;

    /// Claim all accrued rewards; returns what was paid out per token.
    fn claim_rewards(&mut self) -> Result<Vec<(TokenId, Balance)>, TidelockError>;

    /// Shutdown path: withdraw everything regardless of schedule.
    fn emergency_unlock(&mut self) -> Result<Balance, TidelockError>;
}

// ── Fee splitter ─────────────────────────────────────────────────────────────

/// External payout contract fees are routed through.
pub trait FeeSplitter {
    fn distribute(&mut self, asset: Asset, amount: Balance) -> Result<(), TidelockError>;
}

// ── Vote delegation ──────────────────────────────────────────────────────────

/// External registry mapping a namespace to a delegate account.
pub trait VoteDelegateRegistry {
    fn set_delegate(&mut self, space: &str, delegate: &AccountId) -> Result<(), TidelockError>;
    fn clear_delegate(&mut self, space: &str) -> Result<(), TidelockError>;
}

// ── Reward-proof verification ────────────────────────────────────────────────

/// External vault paying out proof-gated rewards: verify the proof and pay,
/// or fail the whole claim.
pub trait RewardVerifier {
    fn claim(
        &mut self,
        token: TokenId,
        index: u64,
        amount: Balance,
        proof: &[[u8; 32]],
    ) -> Result<Balance, TidelockError>;
}
