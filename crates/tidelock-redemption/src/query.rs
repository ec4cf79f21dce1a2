use tidelock_core::epoch::{epoch_of, EpochRecord};
use tidelock_core::error::TidelockError;
use tidelock_core::types::{AccountId, Balance, FuturesKind, Timestamp};
use tidelock_state::StateDb;

/// Query helpers over the redemption and reward ledgers.
pub struct RedemptionQuery<'a> {
    db: &'a StateDb,
}

impl<'a> RedemptionQuery<'a> {
    pub fn new(db: &'a StateDb) -> Self {
        Self { db }
    }

    /// Fetch the record for the epoch containing `at`, if any.
    pub fn epoch_at(&self, at: Timestamp) -> Result<Option<EpochRecord>, TidelockError> {
        self.db.get_epoch(epoch_of(at))
    }

    /// An account's outstanding redemption notes, ordered by unlock time.
    pub fn account_notes(
        &self,
        account: &AccountId,
    ) -> Result<Vec<(Timestamp, Balance)>, TidelockError> {
        self.db.redemption_notes_for(account)
    }

    /// Human-readable summary of one epoch's reward ledger.
    pub fn describe_epoch(&self, at: Timestamp) -> Result<String, TidelockError> {
        let epoch = epoch_of(at);
        let record = self
            .db
            .get_epoch(epoch)?
            .ok_or(TidelockError::NoSuchEpoch { epoch })?;

        let mut out = format!(
            "Epoch {} | snapshot #{} | {} reward token(s)",
            record.epoch,
            record.snapshot_id,
            record.reward_tokens.len()
        );
        let futures_supply = self
            .db
            .futures_minted(FuturesKind::Reward, record.epoch)?;
        for (i, token) in record.reward_tokens.iter().enumerate() {
            out.push_str(&format!(
                "\n  [{}] {} — snapshot {} / futures {} (futures supply {})",
                i, token, record.snapshot_amounts[i], record.futures_amounts[i], futures_supply
            ));
        }
        Ok(out)
    }

    /// Human-readable summary of an account's positions.
    pub fn describe_account(
        &self,
        account: &AccountId,
        now: Timestamp,
    ) -> Result<String, TidelockError> {
        let record = self.db.account_or_default(account)?;
        let mut out = format!(
            "Account {} | base {} | receipt {}",
            account, record.base_balance, record.receipt_balance
        );
        for (unlock_time, balance) in self.db.redemption_notes_for(account)? {
            let status = if now >= unlock_time {
                "redeemable"
            } else {
                "pending"
            };
            out.push_str(&format!(
                "\n  note {} @ {} ({})",
                balance, unlock_time, status
            ));
        }
        Ok(out)
    }

    /// Aggregate obligation summary: global scalar, per-bucket amounts, and
    /// the base asset held back to cover them.
    pub fn outstanding_summary(&self) -> Result<String, TidelockError> {
        let outstanding = self.db.outstanding_redemptions()?;
        let on_hand = self.db.on_hand()?;
        let buckets = self.db.iter_redemption_buckets()?;
        let mut out = format!(
            "Outstanding redemptions {} | on hand {} | {} bucket(s)",
            outstanding,
            on_hand,
            buckets.len()
        );
        for (unlock_time, amount) in buckets {
            out.push_str(&format!("\n  {} owed at {}", amount, unlock_time));
        }
        Ok(out)
    }
}
