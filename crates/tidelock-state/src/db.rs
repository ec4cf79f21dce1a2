use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use tidelock_core::account::Account;
use tidelock_core::config::FeeConfig;
use tidelock_core::epoch::EpochRecord;
use tidelock_core::error::TidelockError;
use tidelock_core::stake::StakePool;
use tidelock_core::types::{AccountId, Balance, FuturesKind, SnapshotId, Timestamp, TokenId};

/// Persistent ledger database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees (analogous to column families):
///   accounts            — AccountId bytes            → bincode(Account)
///   epochs              — epoch ts BE                → bincode(EpochRecord)
///   redemption_notes    — account ++ unlock ts BE    → bincode(Balance)
///   redemption_buckets  — unlock ts BE               → bincode(Balance)
///   futures_notes       — kind ++ epoch BE ++ account → bincode(Balance)
///   futures_minted      — kind ++ epoch BE           → bincode(Balance)
///   stake_pools         — expiry BE                  → bincode(StakePool)
///   stake_shares        — expiry BE ++ account       → bincode(Balance)
///   snapshots           — snapshot id BE ++ account  → bincode(Balance)
///   snapshot_claims     — epoch BE ++ index BE ++ account → [] (membership set)
///   token_balances      — token ++ account           → bincode(Balance)
///   reward_pots         — token                      → bincode(Balance)
///   meta                — utf8 key bytes             → bincode scalar
pub struct StateDb {
    _db: sled::Db,
    accounts: sled::Tree,
    epochs: sled::Tree,
    redemption_notes: sled::Tree,
    redemption_buckets: sled::Tree,
    futures_notes: sled::Tree,
    futures_minted: sled::Tree,
    stake_pools: sled::Tree,
    stake_shares: sled::Tree,
    snapshots: sled::Tree,
    snapshot_claims: sled::Tree,
    token_balances: sled::Tree,
    reward_pots: sled::Tree,
    meta: sled::Tree,
}

// ── Key builders ─────────────────────────────────────────────────────────────

fn ts_key(ts: Timestamp) -> [u8; 8] {
    ts.to_be_bytes()
}

fn note_key(account: &AccountId, unlock_time: Timestamp) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..32].copy_from_slice(account.as_bytes());
    key[32..].copy_from_slice(&unlock_time.to_be_bytes());
    key
}

fn futures_note_key(kind: FuturesKind, epoch: Timestamp, account: &AccountId) -> [u8; 41] {
    let mut key = [0u8; 41];
    key[0] = kind.key_byte();
    key[1..9].copy_from_slice(&epoch.to_be_bytes());
    key[9..].copy_from_slice(account.as_bytes());
    key
}

fn futures_minted_key(kind: FuturesKind, epoch: Timestamp) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = kind.key_byte();
    key[1..].copy_from_slice(&epoch.to_be_bytes());
    key
}

fn shares_key(expiry: Timestamp, account: &AccountId) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&expiry.to_be_bytes());
    key[8..].copy_from_slice(account.as_bytes());
    key
}

fn snapshot_key(id: SnapshotId, account: &AccountId) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&id.to_be_bytes());
    key[8..].copy_from_slice(account.as_bytes());
    key
}

fn claim_key(epoch: Timestamp, reward_index: u32, account: &AccountId) -> [u8; 44] {
    let mut key = [0u8; 44];
    key[..8].copy_from_slice(&epoch.to_be_bytes());
    key[8..12].copy_from_slice(&reward_index.to_be_bytes());
    key[12..].copy_from_slice(account.as_bytes());
    key
}

fn token_balance_key(token: &TokenId, account: &AccountId) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(token.as_bytes());
    key[32..].copy_from_slice(account.as_bytes());
    key
}

// ── Tree helpers ─────────────────────────────────────────────────────────────

fn get<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<Option<T>, TidelockError> {
    match tree.get(key).map_err(|e| TidelockError::Storage(e.to_string()))? {
        Some(bytes) => {
            let value = bincode::deserialize(&bytes)
                .map_err(|e| TidelockError::Serialization(e.to_string()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn put<T: Serialize>(tree: &sled::Tree, key: &[u8], value: &T) -> Result<(), TidelockError> {
    let bytes =
        bincode::serialize(value).map_err(|e| TidelockError::Serialization(e.to_string()))?;
    tree.insert(key, bytes)
        .map_err(|e| TidelockError::Storage(e.to_string()))?;
    Ok(())
}

fn get_balance(tree: &sled::Tree, key: &[u8]) -> Result<Balance, TidelockError> {
    Ok(get::<Balance>(tree, key)?.unwrap_or(0))
}

impl StateDb {
    /// Open or create the ledger database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TidelockError> {
        let open_err = |e: sled::Error| TidelockError::Storage(e.to_string());
        let db = sled::open(path).map_err(open_err)?;
        let tree = |name: &str| db.open_tree(name).map_err(open_err);
        Ok(Self {
            accounts: tree("accounts")?,
            epochs: tree("epochs")?,
            redemption_notes: tree("redemption_notes")?,
            redemption_buckets: tree("redemption_buckets")?,
            futures_notes: tree("futures_notes")?,
            futures_minted: tree("futures_minted")?,
            stake_pools: tree("stake_pools")?,
            stake_shares: tree("stake_shares")?,
            snapshots: tree("snapshots")?,
            snapshot_claims: tree("snapshot_claims")?,
            token_balances: tree("token_balances")?,
            reward_pots: tree("reward_pots")?,
            meta: tree("meta")?,
            _db: db,
        })
    }

    // ── Accounts ─────────────────────────────────────────────────────────────

    pub fn get_account(&self, id: &AccountId) -> Result<Option<Account>, TidelockError> {
        get(&self.accounts, id.as_bytes())
    }

    /// Fetch an account, or a fresh zero-balance record if none exists.
    pub fn account_or_default(&self, id: &AccountId) -> Result<Account, TidelockError> {
        Ok(self.get_account(id)?.unwrap_or_else(|| Account::new(id.clone())))
    }

    pub fn put_account(&self, account: &Account) -> Result<(), TidelockError> {
        put(&self.accounts, account.account_id.as_bytes(), account)
    }

    pub fn iter_accounts(&self) -> Result<Vec<Account>, TidelockError> {
        let mut out = Vec::new();
        for item in self.accounts.iter() {
            let (_, bytes) = item.map_err(|e| TidelockError::Storage(e.to_string()))?;
            out.push(
                bincode::deserialize(&bytes)
                    .map_err(|e| TidelockError::Serialization(e.to_string()))?,
            );
        }
        Ok(out)
    }

    // ── Epochs ───────────────────────────────────────────────────────────────

    pub fn get_epoch(&self, epoch: Timestamp) -> Result<Option<EpochRecord>, TidelockError> {
        get(&self.epochs, &ts_key(epoch))
    }

    pub fn put_epoch(&self, record: &EpochRecord) -> Result<(), TidelockError> {
        put(&self.epochs, &ts_key(record.epoch), record)
    }

    pub fn iter_epochs(&self) -> Result<Vec<EpochRecord>, TidelockError> {
        let mut out = Vec::new();
        for item in self.epochs.iter() {
            let (_, bytes) = item.map_err(|e| TidelockError::Storage(e.to_string()))?;
            out.push(
                bincode::deserialize(&bytes)
                    .map_err(|e| TidelockError::Serialization(e.to_string()))?,
            );
        }
        Ok(out)
    }

    // ── Redemption notes and buckets ─────────────────────────────────────────

    pub fn redemption_note(
        &self,
        account: &AccountId,
        unlock_time: Timestamp,
    ) -> Result<Balance, TidelockError> {
        get_balance(&self.redemption_notes, &note_key(account, unlock_time))
    }

    pub fn put_redemption_note(
        &self,
        account: &AccountId,
        unlock_time: Timestamp,
        balance: Balance,
    ) -> Result<(), TidelockError> {
        let key = note_key(account, unlock_time);
        if balance == 0 {
            self.redemption_notes
                .remove(key)
                .map_err(|e| TidelockError::Storage(e.to_string()))?;
            Ok(())
        } else {
            put(&self.redemption_notes, &key, &balance)
        }
    }

    /// All of an account's outstanding redemption notes, ordered by unlock time.
    pub fn redemption_notes_for(
        &self,
        account: &AccountId,
    ) -> Result<Vec<(Timestamp, Balance)>, TidelockError> {
        let mut out = Vec::new();
        for item in self.redemption_notes.scan_prefix(account.as_bytes()) {
            let (key, bytes) = item.map_err(|e| TidelockError::Storage(e.to_string()))?;
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&key[32..]);
            let balance = bincode::deserialize(&bytes)
                .map_err(|e| TidelockError::Serialization(e.to_string()))?;
            out.push((Timestamp::from_be_bytes(ts), balance));
        }
        Ok(out)
    }

    pub fn redemption_bucket(&self, unlock_time: Timestamp) -> Result<Balance, TidelockError> {
        get_balance(&self.redemption_buckets, &ts_key(unlock_time))
    }

    pub fn put_redemption_bucket(
        &self,
        unlock_time: Timestamp,
        balance: Balance,
    ) -> Result<(), TidelockError> {
        let key = ts_key(unlock_time);
        if balance == 0 {
            self.redemption_buckets
                .remove(key)
                .map_err(|e| TidelockError::Storage(e.to_string()))?;
            Ok(())
        } else {
            put(&self.redemption_buckets, &key, &balance)
        }
    }

    /// All non-empty obligation buckets, ordered by unlock time.
    pub fn iter_redemption_buckets(&self) -> Result<Vec<(Timestamp, Balance)>, TidelockError> {
        let mut out = Vec::new();
        for item in self.redemption_buckets.iter() {
            let (key, bytes) = item.map_err(|e| TidelockError::Storage(e.to_string()))?;
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&key);
            let balance = bincode::deserialize(&bytes)
                .map_err(|e| TidelockError::Serialization(e.to_string()))?;
            out.push((Timestamp::from_be_bytes(ts), balance));
        }
        Ok(out)
    }

    // ── Futures notes ────────────────────────────────────────────────────────

    pub fn futures_note(
        &self,
        kind: FuturesKind,
        epoch: Timestamp,
        account: &AccountId,
    ) -> Result<Balance, TidelockError> {
        get_balance(&self.futures_notes, &futures_note_key(kind, epoch, account))
    }

    pub fn put_futures_note(
        &self,
        kind: FuturesKind,
        epoch: Timestamp,
        account: &AccountId,
        balance: Balance,
    ) -> Result<(), TidelockError> {
        let key = futures_note_key(kind, epoch, account);
        if balance == 0 {
            self.futures_notes
                .remove(&key as &[u8])
                .map_err(|e| TidelockError::Storage(e.to_string()))?;
            Ok(())
        } else {
            put(&self.futures_notes, &key, &balance)
        }
    }

    /// Total notes ever minted for (kind, epoch). Unchanged by claim burns.
    pub fn futures_minted(
        &self,
        kind: FuturesKind,
        epoch: Timestamp,
    ) -> Result<Balance, TidelockError> {
        get_balance(&self.futures_minted, &futures_minted_key(kind, epoch))
    }

    pub fn put_futures_minted(
        &self,
        kind: FuturesKind,
        epoch: Timestamp,
        balance: Balance,
    ) -> Result<(), TidelockError> {
        put(&self.futures_minted, &futures_minted_key(kind, epoch), &balance)
    }

    // ── Stake pools ──────────────────────────────────────────────────────────

    pub fn get_stake_pool(&self, expiry: Timestamp) -> Result<Option<StakePool>, TidelockError> {
        get(&self.stake_pools, &ts_key(expiry))
    }

    pub fn put_stake_pool(&self, pool: &StakePool) -> Result<(), TidelockError> {
        put(&self.stake_pools, &ts_key(pool.expiry), pool)
    }

    pub fn stake_shares(
        &self,
        expiry: Timestamp,
        account: &AccountId,
    ) -> Result<Balance, TidelockError> {
        get_balance(&self.stake_shares, &shares_key(expiry, account))
    }

    pub fn put_stake_shares(
        &self,
        expiry: Timestamp,
        account: &AccountId,
        balance: Balance,
    ) -> Result<(), TidelockError> {
        let key = shares_key(expiry, account);
        if balance == 0 {
            self.stake_shares
                .remove(&key as &[u8])
                .map_err(|e| TidelockError::Storage(e.to_string()))?;
            Ok(())
        } else {
            put(&self.stake_shares, &key, &balance)
        }
    }

    // ── Snapshots ────────────────────────────────────────────────────────────

    pub fn snapshot_balance(
        &self,
        id: SnapshotId,
        account: &AccountId,
    ) -> Result<Balance, TidelockError> {
        get_balance(&self.snapshots, &snapshot_key(id, account))
    }

    pub fn put_snapshot_balance(
        &self,
        id: SnapshotId,
        account: &AccountId,
        balance: Balance,
    ) -> Result<(), TidelockError> {
        put(&self.snapshots, &snapshot_key(id, account), &balance)
    }

    pub fn snapshot_supply(&self, id: SnapshotId) -> Result<Balance, TidelockError> {
        Ok(get::<Balance>(&self.meta, format!("snapshot_supply_{id}").as_bytes())?.unwrap_or(0))
    }

    pub fn set_snapshot_supply(&self, id: SnapshotId, supply: Balance) -> Result<(), TidelockError> {
        put(&self.meta, format!("snapshot_supply_{id}").as_bytes(), &supply)
    }

    // ── Snapshot claim set ───────────────────────────────────────────────────

    pub fn snapshot_claimed(
        &self,
        epoch: Timestamp,
        reward_index: u32,
        account: &AccountId,
    ) -> Result<bool, TidelockError> {
        self.snapshot_claims
            .contains_key(claim_key(epoch, reward_index, account))
            .map_err(|e| TidelockError::Storage(e.to_string()))
    }

    pub fn mark_snapshot_claimed(
        &self,
        epoch: Timestamp,
        reward_index: u32,
        account: &AccountId,
    ) -> Result<(), TidelockError> {
        self.snapshot_claims
            .insert(claim_key(epoch, reward_index, account), b"".as_ref())
            .map_err(|e| TidelockError::Storage(e.to_string()))?;
        Ok(())
    }

    // ── Reward-token balances and pots ───────────────────────────────────────

    pub fn token_balance(
        &self,
        token: &TokenId,
        account: &AccountId,
    ) -> Result<Balance, TidelockError> {
        get_balance(&self.token_balances, &token_balance_key(token, account))
    }

    pub fn put_token_balance(
        &self,
        token: &TokenId,
        account: &AccountId,
        balance: Balance,
    ) -> Result<(), TidelockError> {
        put(&self.token_balances, &token_balance_key(token, account), &balance)
    }

    /// Undistributed rewards the engine still holds for `token`.
    pub fn reward_pot(&self, token: &TokenId) -> Result<Balance, TidelockError> {
        get_balance(&self.reward_pots, token.as_bytes())
    }

    pub fn put_reward_pot(&self, token: &TokenId, balance: Balance) -> Result<(), TidelockError> {
        put(&self.reward_pots, token.as_bytes(), &balance)
    }

    pub fn iter_reward_pots(&self) -> Result<Vec<(TokenId, Balance)>, TidelockError> {
        let mut out = Vec::new();
        for item in self.reward_pots.iter() {
            let (key, bytes) = item.map_err(|e| TidelockError::Storage(e.to_string()))?;
            let mut id = [0u8; 32];
            id.copy_from_slice(&key);
            let balance = bincode::deserialize(&bytes)
                .map_err(|e| TidelockError::Serialization(e.to_string()))?;
            out.push((TokenId::from_bytes(id), balance));
        }
        Ok(out)
    }

    // ── Meta scalars ─────────────────────────────────────────────────────────

    pub fn receipt_supply(&self) -> Result<Balance, TidelockError> {
        Ok(get::<Balance>(&self.meta, b"receipt_supply")?.unwrap_or(0))
    }

    pub fn set_receipt_supply(&self, supply: Balance) -> Result<(), TidelockError> {
        put(&self.meta, b"receipt_supply", &supply)
    }

    pub fn outstanding_redemptions(&self) -> Result<Balance, TidelockError> {
        Ok(get::<Balance>(&self.meta, b"outstanding_redemptions")?.unwrap_or(0))
    }

    pub fn set_outstanding_redemptions(&self, amount: Balance) -> Result<(), TidelockError> {
        put(&self.meta, b"outstanding_redemptions", &amount)
    }

    /// Base asset the engine holds outside the lock gateway.
    pub fn on_hand(&self) -> Result<Balance, TidelockError> {
        Ok(get::<Balance>(&self.meta, b"on_hand")?.unwrap_or(0))
    }

    pub fn set_on_hand(&self, amount: Balance) -> Result<(), TidelockError> {
        put(&self.meta, b"on_hand", &amount)
    }

    /// Number of snapshots taken so far; ids run 1..=count.
    pub fn snapshot_count(&self) -> Result<SnapshotId, TidelockError> {
        Ok(get::<SnapshotId>(&self.meta, b"snapshot_count")?.unwrap_or(0))
    }

    pub fn set_snapshot_count(&self, count: SnapshotId) -> Result<(), TidelockError> {
        put(&self.meta, b"snapshot_count", &count)
    }

    pub fn paused(&self) -> Result<bool, TidelockError> {
        Ok(get::<bool>(&self.meta, b"paused")?.unwrap_or(false))
    }

    pub fn set_paused(&self, paused: bool) -> Result<(), TidelockError> {
        put(&self.meta, b"paused", &paused)
    }

    pub fn migration_target(&self) -> Result<Option<AccountId>, TidelockError> {
        get(&self.meta, b"migration_target")
    }

    pub fn set_migration_target(&self, target: &AccountId) -> Result<(), TidelockError> {
        put(&self.meta, b"migration_target", target)
    }

    pub fn fee_config(&self) -> Result<Option<FeeConfig>, TidelockError> {
        get(&self.meta, b"fees")
    }

    pub fn set_fee_config(&self, fees: &FeeConfig) -> Result<(), TidelockError> {
        put(&self.meta, b"fees", fees)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), TidelockError> {
        self._db
            .flush()
            .map_err(|e| TidelockError::Storage(e.to_string()))?;
        Ok(())
    }
}
