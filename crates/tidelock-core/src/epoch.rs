use serde::{Deserialize, Serialize};

use crate::constants::EPOCH_DURATION;
use crate::error::TidelockError;
use crate::fees::RewardSplit;
use crate::types::{Balance, SnapshotId, Timestamp, TokenId};

// ── Epoch clock ──────────────────────────────────────────────────────────────

/// Start timestamp of the epoch containing `now`. Total and monotonic.
pub fn epoch_of(now: Timestamp) -> Timestamp {
    now - now.rem_euclid(EPOCH_DURATION)
}

/// First timestamp after the epoch starting at `epoch` has fully elapsed.
pub fn epoch_end(epoch: Timestamp) -> Timestamp {
    epoch + EPOCH_DURATION
}

/// Start of the epoch after the one containing `now`.
pub fn next_epoch(now: Timestamp) -> Timestamp {
    epoch_of(now) + EPOCH_DURATION
}

pub fn is_epoch_boundary(ts: Timestamp) -> bool {
    ts.rem_euclid(EPOCH_DURATION) == 0
}

/// Number of futures rounds covering `remaining` seconds of wait time:
/// whole epochs, plus one more when the remainder exceeds half an epoch.
pub fn futures_rounds(remaining: Timestamp) -> u64 {
    if remaining <= 0 {
        return 0;
    }
    let whole = (remaining / EPOCH_DURATION) as u64;
    if remaining % EPOCH_DURATION > EPOCH_DURATION / 2 {
        whole + 1
    } else {
        whole
    }
}

/// Expiry key of a stake entered now and held for `rounds` epochs.
pub fn stake_expiry(now: Timestamp, rounds: u64) -> Timestamp {
    epoch_of(now) + rounds as i64 * EPOCH_DURATION
}

// ── EpochRecord ──────────────────────────────────────────────────────────────

/// Per-epoch reward bookkeeping.
///
/// Created lazily on the first maintenance call or reward claim that touches
/// the epoch. `reward_tokens` is append-only with no duplicate token; the
/// parallel amount vectors record the holder/futures split per token and are
/// never decremented — claim bookkeeping lives in separate ledgers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Epoch start timestamp (the record's key).
    pub epoch: Timestamp,
    /// Snapshot taken during this epoch's maintenance; 0 until then.
    pub snapshot_id: SnapshotId,
    pub reward_tokens: Vec<TokenId>,
    /// Portion of each reward allocated to snapshot holders.
    pub snapshot_amounts: Vec<Balance>,
    /// Portion of each reward allocated to reward-futures holders.
    pub futures_amounts: Vec<Balance>,
}

impl EpochRecord {
    pub fn new(epoch: Timestamp) -> Self {
        Self {
            epoch,
            snapshot_id: 0,
            reward_tokens: Vec::new(),
            snapshot_amounts: Vec::new(),
            futures_amounts: Vec::new(),
        }
    }

    pub fn reward_index(&self, token: &TokenId) -> Option<u32> {
        self.reward_tokens.iter().position(|t| t == token).map(|i| i as u32)
    }

    /// Record a reward split, accumulating into the token's existing index if
    /// it was already claimed this epoch. Returns the reward index.
    pub fn accumulate_reward(&mut self, token: TokenId, split: &RewardSplit) -> u32 {
        match self.reward_index(&token) {
            Some(i) => {
                self.snapshot_amounts[i as usize] += split.snapshot;
                self.futures_amounts[i as usize] += split.futures;
                i
            }
            None => self.append_reward_unchecked(token, split),
        }
    }

    /// Record a reward split for a token that must not yet appear this epoch.
    pub fn append_reward(
        &mut self,
        token: TokenId,
        split: &RewardSplit,
    ) -> Result<u32, TidelockError> {
        if self.reward_index(&token).is_some() {
            return Err(TidelockError::DuplicateRewardToken { token });
        }
        Ok(self.append_reward_unchecked(token, split))
    }

    fn append_reward_unchecked(&mut self, token: TokenId, split: &RewardSplit) -> u32 {
        self.reward_tokens.push(token);
        self.snapshot_amounts.push(split.snapshot);
        self.futures_amounts.push(split.futures);
        (self.reward_tokens.len() - 1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::EPOCH_DURATION;

    #[test]
    fn epoch_of_floors_to_boundary() {
        assert_eq!(epoch_of(0), 0);
        assert_eq!(epoch_of(1), 0);
        assert_eq!(epoch_of(EPOCH_DURATION - 1), 0);
        assert_eq!(epoch_of(EPOCH_DURATION), EPOCH_DURATION);
        assert_eq!(epoch_of(EPOCH_DURATION * 5 + 123), EPOCH_DURATION * 5);
    }

    #[test]
    fn epoch_of_is_monotonic() {
        let mut last = epoch_of(0);
        for now in (0..EPOCH_DURATION * 3).step_by(50_000) {
            let e = epoch_of(now);
            assert!(e >= last);
            assert!(e <= now);
            last = e;
        }
    }

    #[test]
    fn boundary_detection() {
        assert!(is_epoch_boundary(0));
        assert!(is_epoch_boundary(EPOCH_DURATION * 7));
        assert!(!is_epoch_boundary(EPOCH_DURATION * 7 + 1));
    }

    #[test]
    fn rounds_whole_epochs() {
        assert_eq!(futures_rounds(EPOCH_DURATION * 8), 8);
        assert_eq!(futures_rounds(EPOCH_DURATION), 1);
    }

    #[test]
    fn rounds_remainder_over_half_adds_one() {
        assert_eq!(futures_rounds(EPOCH_DURATION + EPOCH_DURATION / 2 + 1), 2);
        assert_eq!(futures_rounds(EPOCH_DURATION / 2 + 1), 1);
    }

    #[test]
    fn rounds_remainder_at_or_below_half_does_not() {
        assert_eq!(futures_rounds(EPOCH_DURATION + EPOCH_DURATION / 2), 1);
        assert_eq!(futures_rounds(EPOCH_DURATION / 2), 0);
        assert_eq!(futures_rounds(0), 0);
        assert_eq!(futures_rounds(-5), 0);
    }

    #[test]
    fn accumulate_merges_same_token() {
        let mut e = EpochRecord::new(0);
        let token = TokenId::from_bytes([1u8; 32]);
        let s1 = RewardSplit { fee: 0, snapshot: 80, futures: 20 };
        let s2 = RewardSplit { fee: 0, snapshot: 40, futures: 10 };
        assert_eq!(e.accumulate_reward(token, &s1), 0);
        assert_eq!(e.accumulate_reward(token, &s2), 0);
        assert_eq!(e.reward_tokens.len(), 1);
        assert_eq!(e.snapshot_amounts[0], 120);
        assert_eq!(e.futures_amounts[0], 30);
    }

    #[test]
    fn append_rejects_duplicate_token() {
        let mut e = EpochRecord::new(0);
        let token = TokenId::from_bytes([2u8; 32]);
        let split = RewardSplit { fee: 0, snapshot: 1, futures: 0 };
        e.append_reward(token, &split).unwrap();
        assert!(matches!(
            e.append_reward(token, &split),
            Err(TidelockError::DuplicateRewardToken { .. })
        ));
    }
}
