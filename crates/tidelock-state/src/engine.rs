use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use tidelock_core::account::Account;
use tidelock_core::config::{EngineConfig, FeeConfig};
use tidelock_core::epoch::{
    epoch_end, epoch_of, futures_rounds, is_epoch_boundary, next_epoch, stake_expiry, EpochRecord,
};
use tidelock_core::error::TidelockError;
use tidelock_core::fees::{fee_breakdown, redemption_fee_percent, split_reward};
use tidelock_core::stake::StakePool;
use tidelock_core::types::{AccountId, Asset, Balance, FuturesKind, SnapshotId, Timestamp, TokenId};
use tidelock_core::EPOCH_DURATION;
use tidelock_gateway::{FeeSplitter, LockGateway, RewardVerifier, VoteDelegateRegistry};
use tracing::{info, warn};

use crate::db::StateDb;

// ── Staged mutations ──────────────────────────────────────────────────────────

/// Snapshot of all receipt balances, written when an epoch's maintenance
/// assigns its snapshot id.
struct SnapshotWrite {
    id: SnapshotId,
    balances: Vec<(AccountId, Balance)>,
    supply: Balance,
}

/// All state changes staged by an operation before its atomic commit.
/// Every value is absolute (post-operation), never a delta.
#[derive(Default)]
struct Staged {
    accounts: Vec<Account>,
    epochs: Vec<EpochRecord>,
    redemption_notes: BTreeMap<(AccountId, Timestamp), Balance>,
    redemption_buckets: BTreeMap<Timestamp, Balance>,
    futures_notes: BTreeMap<(FuturesKind, Timestamp, AccountId), Balance>,
    futures_minted: BTreeMap<(FuturesKind, Timestamp), Balance>,
    stake_pools: Vec<StakePool>,
    stake_shares: BTreeMap<(Timestamp, AccountId), Balance>,
    token_balances: BTreeMap<(TokenId, AccountId), Balance>,
    reward_pots: BTreeMap<TokenId, Balance>,
    snapshot_claims: Vec<(Timestamp, u32, AccountId)>,
    snapshot: Option<SnapshotWrite>,
    receipt_supply: Option<Balance>,
    outstanding: Option<Balance>,
    on_hand: Option<Balance>,
}

// ── Working account copies ────────────────────────────────────────────────────

/// Cache of accounts loaded during one operation. Looking the same account up
/// twice yields the same working copy, so caller/receiver aliasing is safe.
#[derive(Default)]
struct AccountSet {
    loaded: BTreeMap<AccountId, Account>,
}

impl AccountSet {
    fn get<'a>(
        &'a mut self,
        db: &StateDb,
        id: &AccountId,
    ) -> Result<&'a mut Account, TidelockError> {
        match self.loaded.entry(id.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(db.account_or_default(id)?)),
        }
    }

    fn into_accounts(self) -> Vec<Account> {
        self.loaded.into_values().collect()
    }
}

// ── LedgerEngine ──────────────────────────────────────────────────────────────

/// The core orchestrator.
///
/// Owns all mutation rights over the ledgers in `StateDb` and is the sole
/// caller of the external collaborators. Every public operation validates its
/// inputs fully, stages its mutations, then commits them as a unit: a failed
/// operation leaves the ledgers untouched. Entry points are reentrancy-locked
/// and pause-gated.
pub struct LedgerEngine<G, S, D, V>
where
    G: LockGateway,
    S: FeeSplitter,
    D: VoteDelegateRegistry,
    V: RewardVerifier,
{
    pub db: Arc<StateDb>,
    config: EngineConfig,
    fees: FeeConfig,
    gateway: G,
    splitter: S,
    delegates: D,
    verifier: V,
    entered: bool,
}

impl<G, S, D, V> LedgerEngine<G, S, D, V>
where
    G: LockGateway,
    S: FeeSplitter,
    D: VoteDelegateRegistry,
    V: RewardVerifier,
{
    pub fn new(
        db: Arc<StateDb>,
        config: EngineConfig,
        gateway: G,
        splitter: S,
        delegates: D,
        verifier: V,
    ) -> Result<Self, TidelockError> {
        config.validate()?;
        // Fee settings persist across restarts; the config only seeds them.
        let fees = match db.fee_config()? {
            Some(fees) => fees,
            None => {
                db.set_fee_config(&config.fees)?;
                config.fees
            }
        };
        Ok(Self {
            db,
            config,
            fees,
            gateway,
            splitter,
            delegates,
            verifier,
            entered: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fees(&self) -> &FeeConfig {
        &self.fees
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Direct collaborator access, e.g. to drive reward accrual in tests.
    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn splitter(&self) -> &S {
        &self.splitter
    }

    pub fn delegates(&self) -> &D {
        &self.delegates
    }

    pub fn verifier_mut(&mut self) -> &mut V {
        &mut self.verifier
    }

    // ── Guards ───────────────────────────────────────────────────────────────

    fn non_reentrant<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, TidelockError>,
    ) -> Result<T, TidelockError> {
        if self.entered {
            return Err(TidelockError::Reentrancy);
        }
        self.entered = true;
        let result = f(self);
        self.entered = false;
        result
    }

    fn require_not_paused(&self) -> Result<(), TidelockError> {
        if self.db.paused()? {
            return Err(TidelockError::Paused);
        }
        Ok(())
    }

    fn require_paused(&self) -> Result<(), TidelockError> {
        if !self.db.paused()? {
            return Err(TidelockError::NotPaused);
        }
        Ok(())
    }

    fn require_owner(&self, caller: &AccountId) -> Result<(), TidelockError> {
        if *caller != self.config.owner {
            return Err(TidelockError::NotAuthorized);
        }
        Ok(())
    }

    // ── Staging helpers ──────────────────────────────────────────────────────

    fn stage_futures_mint(
        &self,
        staged: &mut Staged,
        kind: FuturesKind,
        receiver: &AccountId,
        rounds: u64,
        amount: Balance,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        let start = next_epoch(now);
        for round in 0..rounds {
            let epoch = start + round as i64 * EPOCH_DURATION;
            let note_key = (kind, epoch, receiver.clone());
            let note = match staged.futures_notes.get(&note_key) {
                Some(balance) => *balance,
                None => self.db.futures_note(kind, epoch, receiver)?,
            };
            staged.futures_notes.insert(note_key, note + amount);

            let minted_key = (kind, epoch);
            let minted = match staged.futures_minted.get(&minted_key) {
                Some(balance) => *balance,
                None => self.db.futures_minted(kind, epoch)?,
            };
            staged.futures_minted.insert(minted_key, minted + amount);
        }
        Ok(())
    }

    fn stage_token_credit(
        &self,
        staged: &mut Staged,
        token: TokenId,
        account: &AccountId,
        amount: Balance,
    ) -> Result<(), TidelockError> {
        let key = (token, account.clone());
        let current = match staged.token_balances.get(&key) {
            Some(balance) => *balance,
            None => self.db.token_balance(&token, account)?,
        };
        staged.token_balances.insert(key, current + amount);
        Ok(())
    }

    fn stage_pot_credit(
        &self,
        staged: &mut Staged,
        token: TokenId,
        amount: Balance,
    ) -> Result<(), TidelockError> {
        let current = match staged.reward_pots.get(&token) {
            Some(balance) => *balance,
            None => self.db.reward_pot(&token)?,
        };
        staged.reward_pots.insert(token, current + amount);
        Ok(())
    }

    fn stage_pot_debit(
        &self,
        staged: &mut Staged,
        token: TokenId,
        amount: Balance,
    ) -> Result<(), TidelockError> {
        let current = match staged.reward_pots.get(&token) {
            Some(balance) => *balance,
            None => self.db.reward_pot(&token)?,
        };
        let remaining = current.checked_sub(amount).ok_or_else(|| {
            TidelockError::Storage(format!("reward pot underflow for token {token}"))
        })?;
        staged.reward_pots.insert(token, remaining);
        Ok(())
    }

    /// Write every staged mutation. Runs only after all guards have passed.
    fn commit(&self, staged: Staged) -> Result<(), TidelockError> {
        for account in &staged.accounts {
            self.db.put_account(account)?;
        }
        for record in &staged.epochs {
            self.db.put_epoch(record)?;
        }
        for ((account, unlock_time), balance) in &staged.redemption_notes {
            self.db.put_redemption_note(account, *unlock_time, *balance)?;
        }
        for (unlock_time, balance) in &staged.redemption_buckets {
            self.db.put_redemption_bucket(*unlock_time, *balance)?;
        }
        for ((kind, epoch, account), balance) in &staged.futures_notes {
            self.db.put_futures_note(*kind, *epoch, account, *balance)?;
        }
        for ((kind, epoch), balance) in &staged.futures_minted {
            self.db.put_futures_minted(*kind, *epoch, *balance)?;
        }
        for pool in &staged.stake_pools {
            self.db.put_stake_pool(pool)?;
        }
        for ((expiry, account), balance) in &staged.stake_shares {
            self.db.put_stake_shares(*expiry, account, *balance)?;
        }
        for ((token, account), balance) in &staged.token_balances {
            self.db.put_token_balance(token, account, *balance)?;
        }
        for (token, balance) in &staged.reward_pots {
            self.db.put_reward_pot(token, *balance)?;
        }
        for (epoch, reward_index, account) in &staged.snapshot_claims {
            self.db.mark_snapshot_claimed(*epoch, *reward_index, account)?;
        }
        if let Some(snapshot) = &staged.snapshot {
            for (account, balance) in &snapshot.balances {
                self.db.put_snapshot_balance(snapshot.id, account, *balance)?;
            }
            self.db.set_snapshot_supply(snapshot.id, snapshot.supply)?;
            self.db.set_snapshot_count(snapshot.id)?;
        }
        if let Some(supply) = staged.receipt_supply {
            self.db.set_receipt_supply(supply)?;
        }
        if let Some(outstanding) = staged.outstanding {
            self.db.set_outstanding_redemptions(outstanding)?;
        }
        if let Some(on_hand) = staged.on_hand {
            self.db.set_on_hand(on_hand)?;
        }
        Ok(())
    }

    // ── Deposit ──────────────────────────────────────────────────────────────

    /// Pull base asset from `caller`, lock it, and mint receipt tokens 1:1 to
    /// `receiver` — or to the compounding vault on the receiver's behalf.
    pub fn deposit(
        &mut self,
        caller: &AccountId,
        assets: Balance,
        receiver: &AccountId,
        should_compound: bool,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.deposit_inner(caller, assets, receiver, should_compound, now)
        })
    }

    fn deposit_inner(
        &mut self,
        caller: &AccountId,
        assets: Balance,
        receiver: &AccountId,
        should_compound: bool,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        if assets == 0 {
            return Err(TidelockError::ZeroAmount);
        }
        if receiver.is_zero() {
            return Err(TidelockError::ZeroAccount);
        }

        let mut accounts = AccountSet::default();
        accounts.get(&self.db, caller)?.debit_base(assets)?;
        let mint_to = if should_compound {
            self.config.compound_vault.clone()
        } else {
            receiver.clone()
        };
        accounts.get(&self.db, &mint_to)?.credit_receipt(assets);
        let supply = self.db.receipt_supply()? + assets;

        self.gateway.lock(assets, now)?;

        let staged = Staged {
            accounts: accounts.into_accounts(),
            receipt_supply: Some(supply),
            ..Staged::default()
        };
        self.commit(staged)?;

        info!(
            caller = %caller,
            receiver = %receiver,
            assets,
            compound = should_compound,
            "deposit"
        );
        Ok(())
    }

    // ── Initiate redemption ──────────────────────────────────────────────────

    /// Single-entry convenience form of [`LedgerEngine::initiate_redemption`].
    pub fn initiate_redemption_single(
        &mut self,
        caller: &AccountId,
        lock_index: usize,
        kind: FuturesKind,
        assets: Balance,
        receiver: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.initiate_redemption(caller, &[lock_index], kind, &[assets], receiver, now)
    }

    /// Burn receipt tokens against entries of the gateway's lock schedule,
    /// minting redemption notes (net of the exit fee) and futures notes (for
    /// the gross amount) to `receiver`.
    pub fn initiate_redemption(
        &mut self,
        caller: &AccountId,
        lock_indexes: &[usize],
        kind: FuturesKind,
        assets: &[Balance],
        receiver: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.initiate_redemption_inner(caller, lock_indexes, kind, assets, receiver, now)
        })
    }

    fn initiate_redemption_inner(
        &mut self,
        caller: &AccountId,
        lock_indexes: &[usize],
        kind: FuturesKind,
        assets: &[Balance],
        receiver: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        if lock_indexes.is_empty() {
            return Err(TidelockError::EmptyBatch);
        }
        if lock_indexes.len() != assets.len() {
            return Err(TidelockError::MismatchedArrayLengths {
                left: lock_indexes.len(),
                right: assets.len(),
            });
        }
        if receiver.is_zero() {
            return Err(TidelockError::ZeroAccount);
        }

        let balances = self.gateway.locked_balances(now)?;
        let mut staged = Staged::default();
        let mut bucket_totals: BTreeMap<Timestamp, Balance> = BTreeMap::new();
        let mut note_deltas: BTreeMap<Timestamp, Balance> = BTreeMap::new();
        let mut total_burn: Balance = 0;
        let mut total_fee: Balance = 0;
        let mut total_post: Balance = 0;

        for (&index, &amount) in lock_indexes.iter().zip(assets) {
            if amount == 0 {
                return Err(TidelockError::ZeroAmount);
            }
            let entry = balances.entries.get(index).ok_or(TidelockError::InvalidLockIndex {
                index,
                count: balances.entries.len(),
            })?;
            let unlock_time = entry.unlock_time;
            let remaining = unlock_time - now;

            // Collateral check per unlock-time bucket, against the gross
            // amount, sequentially across the batch.
            let bucket = match bucket_totals.get(&unlock_time) {
                Some(balance) => *balance,
                None => self.db.redemption_bucket(unlock_time)?,
            };
            if bucket + amount > entry.amount {
                return Err(TidelockError::InsufficientRedemptionAllowance {
                    unlock_time,
                    requested: amount,
                    available: entry.amount.saturating_sub(bucket),
                });
            }

            let fee_percent = redemption_fee_percent(remaining, &self.fees);
            let (fee, post_fee) = fee_breakdown(amount, fee_percent);

            bucket_totals.insert(unlock_time, bucket + post_fee);
            *note_deltas.entry(unlock_time).or_default() += post_fee;
            total_burn += amount;
            total_fee += fee;
            total_post += post_fee;

            // Futures compensate the gross amount for every forgone epoch.
            let rounds = futures_rounds(remaining);
            self.stage_futures_mint(&mut staged, kind, receiver, rounds, amount, now)?;
        }

        let mut accounts = AccountSet::default();
        accounts.get(&self.db, caller)?.debit_receipt(total_burn)?;
        if total_fee > 0 {
            accounts
                .get(&self.db, &self.config.fee_splitter)?
                .credit_receipt(total_fee);
        }

        for (unlock_time, delta) in &note_deltas {
            let note = self.db.redemption_note(receiver, *unlock_time)?;
            staged
                .redemption_notes
                .insert((receiver.clone(), *unlock_time), note + delta);
        }
        staged.redemption_buckets = bucket_totals;
        staged.accounts = accounts.into_accounts();
        staged.receipt_supply = Some(self.db.receipt_supply()? - total_post);
        staged.outstanding = Some(self.db.outstanding_redemptions()? + total_post);

        if total_fee > 0 {
            self.splitter.distribute(Asset::Receipt, total_fee)?;
        }
        self.commit(staged)?;

        info!(
            caller = %caller,
            receiver = %receiver,
            kind = %kind,
            entries = lock_indexes.len(),
            burned = total_burn,
            fee = total_fee,
            "initiate redemption"
        );
        Ok(())
    }

    // ── Redeem ───────────────────────────────────────────────────────────────

    /// Burn matured redemption notes held by `caller` and pay base asset to
    /// `receiver`. Runs the relock step first so freed funds never include
    /// amounts owed to other pending redemptions.
    pub fn redeem(
        &mut self,
        caller: &AccountId,
        unlock_times: &[Timestamp],
        assets: &[Balance],
        receiver: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.redeem_inner(caller, unlock_times, assets, receiver, now)
        })
    }

    fn redeem_inner(
        &mut self,
        caller: &AccountId,
        unlock_times: &[Timestamp],
        assets: &[Balance],
        receiver: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        if unlock_times.is_empty() {
            return Err(TidelockError::EmptyBatch);
        }
        if unlock_times.len() != assets.len() {
            return Err(TidelockError::MismatchedArrayLengths {
                left: unlock_times.len(),
                right: assets.len(),
            });
        }
        if receiver.is_zero() {
            return Err(TidelockError::ZeroAccount);
        }

        let mut note_deltas: BTreeMap<Timestamp, Balance> = BTreeMap::new();
        for (&unlock_time, &amount) in unlock_times.iter().zip(assets) {
            if amount == 0 {
                return Err(TidelockError::ZeroAmount);
            }
            if now < unlock_time {
                return Err(TidelockError::BeforeUnlock { unlock_time });
            }
            *note_deltas.entry(unlock_time).or_default() += amount;
        }

        let mut total: Balance = 0;
        for (&unlock_time, &amount) in &note_deltas {
            let have = self.db.redemption_note(caller, unlock_time)?;
            if have < amount {
                return Err(TidelockError::InsufficientNoteBalance {
                    unlock_time,
                    need: amount,
                    have,
                });
            }
            total += amount;
        }

        // Free matured locks and relock the excess; commits on_hand by itself.
        self.relock_step(now)?;

        let on_hand = self.db.on_hand()?;
        if on_hand < total {
            return Err(TidelockError::InsufficientBalance {
                need: total,
                have: on_hand,
            });
        }

        let mut staged = Staged::default();
        for (&unlock_time, &amount) in &note_deltas {
            let note = self.db.redemption_note(caller, unlock_time)?;
            staged
                .redemption_notes
                .insert((caller.clone(), unlock_time), note - amount);
            let bucket = self.db.redemption_bucket(unlock_time)?;
            let remaining = bucket.checked_sub(amount).ok_or_else(|| {
                TidelockError::Storage(format!("redemption bucket underflow at {unlock_time}"))
            })?;
            staged.redemption_buckets.insert(unlock_time, remaining);
        }

        let mut accounts = AccountSet::default();
        accounts.get(&self.db, receiver)?.credit_base(total);
        staged.accounts = accounts.into_accounts();
        staged.outstanding = Some(self.db.outstanding_redemptions()? - total);
        staged.on_hand = Some(on_hand - total);
        self.commit(staged)?;

        info!(
            caller = %caller,
            receiver = %receiver,
            entries = note_deltas.len(),
            paid = total,
            "redeem"
        );
        Ok(())
    }

    // ── Relock ───────────────────────────────────────────────────────────────

    /// Public maintenance form of the relock step.
    pub fn relock(&mut self, now: Timestamp) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.require_not_paused()?;
            engine.relock_step(now)
        })
    }

    /// Withdraw every matured lock entry, then lock everything back except
    /// what outstanding redemptions are owed.
    fn relock_step(&mut self, now: Timestamp) -> Result<(), TidelockError> {
        let freed = self.gateway.process_expired_locks(now)?;
        let mut on_hand = self.db.on_hand()? + freed;
        let outstanding = self.db.outstanding_redemptions()?;
        let relockable = on_hand.saturating_sub(outstanding);
        if relockable > 0 {
            self.gateway.lock(relockable, now)?;
            on_hand -= relockable;
        }
        self.db.set_on_hand(on_hand)?;
        info!(freed, relocked = relockable, held = on_hand, "relock");
        Ok(())
    }

    // ── Stake / unstake ──────────────────────────────────────────────────────

    /// Burn receipt tokens into the share pool expiring `rounds` epochs from
    /// now, minting pool shares and per-epoch futures notes to `receiver`.
    pub fn stake(
        &mut self,
        caller: &AccountId,
        rounds: u64,
        kind: FuturesKind,
        assets: Balance,
        receiver: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| engine.stake_inner(caller, rounds, kind, assets, receiver, now))
    }

    fn stake_inner(
        &mut self,
        caller: &AccountId,
        rounds: u64,
        kind: FuturesKind,
        assets: Balance,
        receiver: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        if rounds == 0 {
            return Err(TidelockError::ZeroRounds);
        }
        if assets == 0 {
            return Err(TidelockError::ZeroAmount);
        }
        if receiver.is_zero() {
            return Err(TidelockError::ZeroAccount);
        }

        let mut accounts = AccountSet::default();
        accounts.get(&self.db, caller)?.debit_receipt(assets)?;

        let expiry = stake_expiry(now, rounds);
        let mut pool = self
            .db
            .get_stake_pool(expiry)?
            .unwrap_or_else(|| StakePool::new(expiry));
        let shares = pool.deposit(assets);
        let held = self.db.stake_shares(expiry, receiver)?;

        let mut staged = Staged::default();
        staged.stake_pools.push(pool);
        staged
            .stake_shares
            .insert((expiry, receiver.clone()), held + shares);
        staged.accounts = accounts.into_accounts();
        staged.receipt_supply = Some(self.db.receipt_supply()? - assets);
        // Staked assets forgo ordinary holding for the whole stake, so the
        // chosen futures kind is minted for each covered epoch.
        self.stage_futures_mint(&mut staged, kind, receiver, rounds, assets, now)?;
        self.commit(staged)?;

        info!(
            caller = %caller,
            receiver = %receiver,
            kind = %kind,
            rounds,
            assets,
            expiry,
            "stake"
        );
        Ok(())
    }

    /// Burn stake-pool shares after expiry, minting receipt tokens back at
    /// the pool's share price.
    pub fn unstake(
        &mut self,
        caller: &AccountId,
        expiry: Timestamp,
        shares: Balance,
        receiver: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| engine.unstake_inner(caller, expiry, shares, receiver, now))
    }

    fn unstake_inner(
        &mut self,
        caller: &AccountId,
        expiry: Timestamp,
        shares: Balance,
        receiver: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        if shares == 0 {
            return Err(TidelockError::ZeroAmount);
        }
        if receiver.is_zero() {
            return Err(TidelockError::ZeroAccount);
        }
        if now < expiry {
            return Err(TidelockError::BeforeStakingExpiry { expiry });
        }

        let held = self.db.stake_shares(expiry, caller)?;
        if held < shares {
            return Err(TidelockError::InsufficientBalance {
                need: shares,
                have: held,
            });
        }
        let mut pool = self.db.get_stake_pool(expiry)?.ok_or_else(|| {
            TidelockError::Storage(format!("stake pool missing for expiry {expiry}"))
        })?;
        let assets = pool.withdraw(shares);

        let mut accounts = AccountSet::default();
        accounts.get(&self.db, receiver)?.credit_receipt(assets);

        let mut staged = Staged::default();
        staged.stake_pools.push(pool);
        staged
            .stake_shares
            .insert((expiry, caller.clone()), held - shares);
        staged.accounts = accounts.into_accounts();
        staged.receipt_supply = Some(self.db.receipt_supply()? + assets);
        self.commit(staged)?;

        info!(
            caller = %caller,
            receiver = %receiver,
            expiry,
            shares,
            assets,
            "unstake"
        );
        Ok(())
    }

    // ── Epoch maintenance ────────────────────────────────────────────────────

    /// Take the current epoch's balance snapshot (first call per epoch) and
    /// pull accrued gateway rewards into its reward ledgers. Safe to repeat
    /// within an epoch; later calls accumulate further rewards.
    pub fn perform_epoch_maintenance(&mut self, now: Timestamp) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| engine.perform_epoch_maintenance_inner(now))
    }

    fn perform_epoch_maintenance_inner(&mut self, now: Timestamp) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        let epoch = epoch_of(now);
        let mut record = self
            .db
            .get_epoch(epoch)?
            .unwrap_or_else(|| EpochRecord::new(epoch));

        let claimed = self.gateway.claim_rewards()?;

        let mut staged = Staged::default();
        let (snapshot_id, snapshot_supply) = if record.snapshot_id == 0 {
            let id = self.db.snapshot_count()? + 1;
            let supply = self.db.receipt_supply()?;
            let balances: Vec<(AccountId, Balance)> = self
                .db
                .iter_accounts()?
                .into_iter()
                .filter(|account| account.receipt_balance > 0)
                .map(|account| (account.account_id, account.receipt_balance))
                .collect();
            staged.snapshot = Some(SnapshotWrite { id, balances, supply });
            record.snapshot_id = id;
            (id, supply)
        } else {
            (record.snapshot_id, self.db.snapshot_supply(record.snapshot_id)?)
        };

        let futures_supply = self.db.futures_minted(FuturesKind::Reward, epoch)?;
        let mut rewards = 0usize;
        for (token, amount) in claimed {
            if amount == 0 {
                continue;
            }
            let split = split_reward(amount, self.fees.reward_fee, snapshot_supply, futures_supply);
            record.accumulate_reward(token, &split);
            self.stage_pot_credit(&mut staged, token, split.distributable())?;
            if split.fee > 0 {
                self.stage_token_credit(&mut staged, token, &self.config.fee_splitter, split.fee)?;
                self.splitter.distribute(Asset::Reward(token), split.fee)?;
            }
            rewards += 1;
        }

        staged.epochs.push(record);
        self.commit(staged)?;

        info!(epoch, snapshot = snapshot_id, rewards, "epoch maintenance");
        Ok(())
    }

    // ── External reward claims ───────────────────────────────────────────────

    /// Verify a proof-gated reward with the external verifier, then record
    /// the payout into the current epoch's reward ledgers.
    pub fn claim_external_reward(
        &mut self,
        caller: &AccountId,
        token: TokenId,
        index: u64,
        amount: Balance,
        proof: &[[u8; 32]],
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.claim_external_reward_inner(caller, token, index, amount, proof, now)
        })
    }

    fn claim_external_reward_inner(
        &mut self,
        caller: &AccountId,
        token: TokenId,
        index: u64,
        amount: Balance,
        proof: &[[u8; 32]],
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        let epoch = epoch_of(now);
        let mut record = self
            .db
            .get_epoch(epoch)?
            .filter(|record| record.snapshot_id != 0)
            .ok_or(TidelockError::SnapshotRequired { epoch })?;
        if record.reward_index(&token).is_some() {
            return Err(TidelockError::DuplicateRewardToken { token });
        }

        let paid = self.verifier.claim(token, index, amount, proof)?;
        if paid == 0 {
            // A zero payout is a valid outcome; nothing to record.
            info!(caller = %caller, token = %token, index, "external reward claim paid zero");
            return Ok(());
        }

        let snapshot_supply = self.db.snapshot_supply(record.snapshot_id)?;
        let futures_supply = self.db.futures_minted(FuturesKind::Reward, epoch)?;
        let split = split_reward(paid, self.fees.reward_fee, snapshot_supply, futures_supply);

        let mut staged = Staged::default();
        record.append_reward(token, &split)?;
        self.stage_pot_credit(&mut staged, token, split.distributable())?;
        if split.fee > 0 {
            self.stage_token_credit(&mut staged, token, &self.config.fee_splitter, split.fee)?;
            self.splitter.distribute(Asset::Reward(token), split.fee)?;
        }
        staged.epochs.push(record);
        self.commit(staged)?;

        info!(
            caller = %caller,
            token = %token,
            index,
            paid,
            epoch,
            "external reward claim"
        );
        Ok(())
    }

    // ── Snapshot reward claims ───────────────────────────────────────────────

    /// Pay `caller`'s snapshot share of one epoch reward to `to`. Each
    /// (epoch, reward index, account) key pays out exactly once.
    pub fn claim_snapshot_reward(
        &mut self,
        caller: &AccountId,
        epoch: Timestamp,
        reward_index: u32,
        to: &AccountId,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.claim_snapshot_reward_inner(caller, epoch, reward_index, to)
        })
    }

    fn claim_snapshot_reward_inner(
        &mut self,
        caller: &AccountId,
        epoch: Timestamp,
        reward_index: u32,
        to: &AccountId,
    ) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        if to.is_zero() {
            return Err(TidelockError::ZeroAccount);
        }
        if !is_epoch_boundary(epoch) {
            return Err(TidelockError::UnalignedEpoch { epoch });
        }

        let record = self
            .db
            .get_epoch(epoch)?
            .filter(|record| record.snapshot_id != 0)
            .ok_or(TidelockError::SnapshotRequired { epoch })?;
        if reward_index as usize >= record.reward_tokens.len() {
            return Err(TidelockError::InvalidRewardIndex {
                index: reward_index,
                count: record.reward_tokens.len(),
            });
        }
        if self.db.snapshot_claimed(epoch, reward_index, caller)? {
            return Err(TidelockError::AlreadyClaimed { epoch, reward_index });
        }

        let balance = self.db.snapshot_balance(record.snapshot_id, caller)?;
        if balance == 0 {
            return Err(TidelockError::InsufficientSnapshotBalance { epoch });
        }
        let supply = self.db.snapshot_supply(record.snapshot_id)?;
        let token = record.reward_tokens[reward_index as usize];
        let entitlement = record.snapshot_amounts[reward_index as usize] * balance / supply;

        let mut staged = Staged::default();
        staged
            .snapshot_claims
            .push((epoch, reward_index, caller.clone()));
        if entitlement > 0 {
            self.stage_token_credit(&mut staged, token, to, entitlement)?;
            self.stage_pot_debit(&mut staged, token, entitlement)?;
        }
        self.commit(staged)?;

        info!(
            caller = %caller,
            to = %to,
            epoch,
            reward_index,
            token = %token,
            amount = entitlement,
            "snapshot reward claim"
        );
        Ok(())
    }

    /// Pay `caller`'s futures share of every reward recorded for `epoch`,
    /// burning the entire reward-futures balance atomically with the payout.
    pub fn claim_futures_rewards(
        &mut self,
        caller: &AccountId,
        epoch: Timestamp,
        to: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| engine.claim_futures_rewards_inner(caller, epoch, to, now))
    }

    fn claim_futures_rewards_inner(
        &mut self,
        caller: &AccountId,
        epoch: Timestamp,
        to: &AccountId,
        now: Timestamp,
    ) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        if to.is_zero() {
            return Err(TidelockError::ZeroAccount);
        }
        if !is_epoch_boundary(epoch) {
            return Err(TidelockError::UnalignedEpoch { epoch });
        }
        if now < epoch_end(epoch) {
            return Err(TidelockError::EpochNotEnded { epoch });
        }

        let balance = self.db.futures_note(FuturesKind::Reward, epoch, caller)?;
        if balance == 0 {
            return Err(TidelockError::InsufficientFuturesBalance { epoch });
        }
        let record = self
            .db
            .get_epoch(epoch)?
            .ok_or(TidelockError::NoSuchEpoch { epoch })?;
        // Entitlement divides by total minted supply, which is frozen once
        // the epoch begins; burns below do not affect other holders' shares.
        let minted = self.db.futures_minted(FuturesKind::Reward, epoch)?;

        let mut staged = Staged::default();
        let mut paid: Balance = 0;
        for (i, token) in record.reward_tokens.iter().enumerate() {
            let amount = record.futures_amounts[i] * balance / minted;
            if amount > 0 {
                self.stage_token_credit(&mut staged, *token, to, amount)?;
                self.stage_pot_debit(&mut staged, *token, amount)?;
                paid += amount;
            }
        }
        staged
            .futures_notes
            .insert((FuturesKind::Reward, epoch, caller.clone()), 0);
        self.commit(staged)?;

        info!(
            caller = %caller,
            to = %to,
            epoch,
            burned = balance,
            tokens = record.reward_tokens.len(),
            paid,
            "futures rewards claim"
        );
        Ok(())
    }

    // ── Receipt transfer ─────────────────────────────────────────────────────

    /// Plain receipt-token transfer between accounts.
    pub fn transfer(
        &mut self,
        caller: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| engine.transfer_inner(caller, to, amount))
    }

    fn transfer_inner(
        &mut self,
        caller: &AccountId,
        to: &AccountId,
        amount: Balance,
    ) -> Result<(), TidelockError> {
        self.require_not_paused()?;
        if amount == 0 {
            return Err(TidelockError::ZeroAmount);
        }
        if to.is_zero() {
            return Err(TidelockError::ZeroAccount);
        }

        let mut accounts = AccountSet::default();
        accounts.get(&self.db, caller)?.debit_receipt(amount)?;
        accounts.get(&self.db, to)?.credit_receipt(amount);
        let staged = Staged {
            accounts: accounts.into_accounts(),
            ..Staged::default()
        };
        self.commit(staged)?;

        info!(from = %caller, to = %to, amount, "receipt transfer");
        Ok(())
    }

    // ── Fee and delegation administration ────────────────────────────────────

    pub fn set_fees(&mut self, caller: &AccountId, fees: FeeConfig) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.require_owner(caller)?;
            fees.validate()?;
            engine.db.set_fee_config(&fees)?;
            engine.fees = fees;
            info!(
                redemption_max = fees.redemption_fee_max,
                redemption_min = fees.redemption_fee_min,
                reward = fees.reward_fee,
                "fees updated"
            );
            Ok(())
        })
    }

    pub fn set_delegation_space(
        &mut self,
        caller: &AccountId,
        space: &str,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.require_owner(caller)?;
            if space.is_empty() {
                return Err(TidelockError::EmptyDelegationSpace);
            }
            engine.config.delegation_space = space.to_string();
            info!(space, "delegation space updated");
            Ok(())
        })
    }

    pub fn set_vote_delegate(
        &mut self,
        caller: &AccountId,
        delegate: &AccountId,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.require_owner(caller)?;
            if delegate.is_zero() {
                return Err(TidelockError::ZeroAccount);
            }
            let space = engine.config.delegation_space.clone();
            engine.delegates.set_delegate(&space, delegate)?;
            info!(space, delegate = %delegate, "vote delegate set");
            Ok(())
        })
    }

    pub fn clear_vote_delegate(&mut self, caller: &AccountId) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.require_owner(caller)?;
            let space = engine.config.delegation_space.clone();
            engine.delegates.clear_delegate(&space)?;
            info!(space, "vote delegate cleared");
            Ok(())
        })
    }

    pub fn set_pause(&mut self, caller: &AccountId, paused: bool) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.require_owner(caller)?;
            engine.db.set_paused(paused)?;
            if paused {
                warn!("engine paused");
            } else {
                info!("engine unpaused");
            }
            Ok(())
        })
    }

    // ── Emergency migration ──────────────────────────────────────────────────

    /// Force-withdraw everything from the gateway regardless of schedule.
    /// Last-resort path for a decommissioned gateway; paused only.
    pub fn emergency_unlock(&mut self, caller: &AccountId) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.require_owner(caller)?;
            engine.require_paused()?;
            let freed = engine.gateway.emergency_unlock()?;
            let on_hand = engine.db.on_hand()? + freed;
            engine.db.set_on_hand(on_hand)?;
            warn!(freed, held = on_hand, "emergency unlock");
            Ok(())
        })
    }

    pub fn set_migration(
        &mut self,
        caller: &AccountId,
        target: &AccountId,
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| {
            engine.require_owner(caller)?;
            engine.require_paused()?;
            if target.is_zero() {
                return Err(TidelockError::ZeroAccount);
            }
            engine.db.set_migration_target(target)?;
            warn!(target = %target, "migration target set");
            Ok(())
        })
    }

    /// Sweep the engine's full holdings of the named assets to the migration
    /// target. Does not preserve per-epoch ledgers — capital preservation
    /// only; the target re-runs relock logic against a new gateway.
    pub fn emergency_migrate_tokens(
        &mut self,
        caller: &AccountId,
        assets: &[Asset],
    ) -> Result<(), TidelockError> {
        self.non_reentrant(|engine| engine.emergency_migrate_tokens_inner(caller, assets))
    }

    fn emergency_migrate_tokens_inner(
        &mut self,
        caller: &AccountId,
        assets: &[Asset],
    ) -> Result<(), TidelockError> {
        self.require_owner(caller)?;
        self.require_paused()?;
        if assets.is_empty() {
            return Err(TidelockError::EmptyBatch);
        }
        let target = self
            .db
            .migration_target()?
            .ok_or(TidelockError::NoMigrationTarget)?;

        let mut staged = Staged::default();
        let mut accounts = AccountSet::default();
        for asset in assets {
            match asset {
                Asset::Base => {
                    // Read through staged so a repeated entry sweeps nothing.
                    let on_hand = staged.on_hand.map_or_else(|| self.db.on_hand(), Ok)?;
                    accounts.get(&self.db, &target)?.credit_base(on_hand);
                    staged.on_hand = Some(0);
                }
                Asset::Reward(token) => {
                    let pot = match staged.reward_pots.get(token) {
                        Some(balance) => *balance,
                        None => self.db.reward_pot(token)?,
                    };
                    self.stage_token_credit(&mut staged, *token, &target, pot)?;
                    staged.reward_pots.insert(*token, 0);
                }
                // The receipt token is the engine's own liability, not a
                // holding that can be swept.
                Asset::Receipt => return Err(TidelockError::UnsupportedAsset),
            }
        }
        staged.accounts = accounts.into_accounts();
        self.commit(staged)?;

        warn!(target = %target, assets = assets.len(), "emergency token migration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidelock_core::MAX_REDEMPTION_TIME;
    use tidelock_gateway::{
        merkle_proof, merkle_root, reward_leaf, MemoryDelegateRegistry, MemoryFeeSplitter,
        MemoryLockGateway, MerkleRewardVault,
    };

    type TestEngine =
        LedgerEngine<MemoryLockGateway, MemoryFeeSplitter, MemoryDelegateRegistry, MerkleRewardVault>;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn acct(n: u8) -> AccountId {
        AccountId::from_bytes([n; 32])
    }

    fn token(n: u8) -> TokenId {
        TokenId::from_bytes([n; 32])
    }

    fn owner() -> AccountId {
        acct(0xA0)
    }

    fn splitter_account() -> AccountId {
        acct(0xA1)
    }

    fn vault_account() -> AccountId {
        acct(0xA2)
    }

    fn test_engine_with(name: &str, fees: FeeConfig) -> TestEngine {
        let dir = std::env::temp_dir().join(format!("tidelock_engine_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(StateDb::open(&dir).expect("open temp db"));
        let mut config = EngineConfig::new(owner(), splitter_account(), vault_account());
        config.fees = fees;
        LedgerEngine::new(
            db,
            config,
            MemoryLockGateway::new(),
            MemoryFeeSplitter::new(),
            MemoryDelegateRegistry::new(),
            MerkleRewardVault::new(),
        )
        .expect("engine")
    }

    fn test_engine(name: &str) -> TestEngine {
        test_engine_with(name, FeeConfig::default())
    }

    fn zero_fees() -> FeeConfig {
        FeeConfig {
            redemption_fee_max: 0,
            redemption_fee_min: 0,
            reward_fee: 0,
        }
    }

    fn seed_base(engine: &TestEngine, id: &AccountId, amount: Balance) {
        let mut account = Account::new(id.clone());
        account.base_balance = amount;
        engine.db.put_account(&account).unwrap();
    }

    fn receipt_balance(engine: &TestEngine, id: &AccountId) -> Balance {
        engine
            .db
            .get_account(id)
            .unwrap()
            .map(|a| a.receipt_balance)
            .unwrap_or(0)
    }

    fn base_balance(engine: &TestEngine, id: &AccountId) -> Balance {
        engine
            .db
            .get_account(id)
            .unwrap()
            .map(|a| a.base_balance)
            .unwrap_or(0)
    }

    const E1: Timestamp = EPOCH_DURATION;
    const E2: Timestamp = 2 * EPOCH_DURATION;

    // ── Deposit ───────────────────────────────────────────────────────────────

    #[test]
    fn deposit_mints_receipt_and_locks() {
        let mut engine = test_engine("deposit");
        let alice = acct(1);
        seed_base(&engine, &alice, 100);

        engine.deposit(&alice, 60, &alice, false, 0).unwrap();

        assert_eq!(base_balance(&engine, &alice), 40);
        assert_eq!(receipt_balance(&engine, &alice), 60);
        assert_eq!(engine.db.receipt_supply().unwrap(), 60);
        let balances = engine.gateway().locked_balances(0).unwrap();
        assert_eq!(balances.locked, 60);
        assert_eq!(balances.entries[0].unlock_time, MAX_REDEMPTION_TIME);
    }

    #[test]
    fn deposit_to_other_receiver() {
        let mut engine = test_engine("deposit_recv");
        let alice = acct(1);
        let bob = acct(2);
        seed_base(&engine, &alice, 10);

        engine.deposit(&alice, 10, &bob, false, 0).unwrap();
        assert_eq!(receipt_balance(&engine, &alice), 0);
        assert_eq!(receipt_balance(&engine, &bob), 10);
    }

    #[test]
    fn deposit_compound_routes_to_vault() {
        let mut engine = test_engine("deposit_compound");
        let alice = acct(1);
        seed_base(&engine, &alice, 10);

        engine.deposit(&alice, 10, &alice, true, 0).unwrap();
        assert_eq!(receipt_balance(&engine, &alice), 0);
        assert_eq!(receipt_balance(&engine, &vault_account()), 10);
    }

    #[test]
    fn deposit_input_validation() {
        let mut engine = test_engine("deposit_validation");
        let alice = acct(1);
        seed_base(&engine, &alice, 10);

        assert!(matches!(
            engine.deposit(&alice, 0, &alice, false, 0),
            Err(TidelockError::ZeroAmount)
        ));
        assert!(matches!(
            engine.deposit(&alice, 1, &AccountId::ZERO, false, 0),
            Err(TidelockError::ZeroAccount)
        ));
        assert!(matches!(
            engine.deposit(&alice, 11, &alice, false, 0),
            Err(TidelockError::InsufficientBalance { need: 11, have: 10 })
        ));
        // Nothing was minted by the failed attempts.
        assert_eq!(engine.db.receipt_supply().unwrap(), 0);
    }

    #[test]
    fn paused_engine_rejects_user_operations() {
        let mut engine = test_engine("paused");
        let alice = acct(1);
        seed_base(&engine, &alice, 10);
        engine.set_pause(&owner(), true).unwrap();

        assert!(matches!(
            engine.deposit(&alice, 1, &alice, false, 0),
            Err(TidelockError::Paused)
        ));
        assert!(matches!(
            engine.perform_epoch_maintenance(0),
            Err(TidelockError::Paused)
        ));

        engine.set_pause(&owner(), false).unwrap();
        engine.deposit(&alice, 1, &alice, false, 0).unwrap();
    }

    // ── Initiate redemption ───────────────────────────────────────────────────

    #[test]
    fn initiate_redemption_full_accounting() {
        // Deposit 10 units at t=0; redeem 1 unit against the full-duration
        // lock: 5% exit fee, 8 futures rounds at the gross amount.
        let mut engine = test_engine("initiate");
        let alice = acct(1);
        seed_base(&engine, &alice, 10_000);
        engine.deposit(&alice, 10_000, &alice, false, 0).unwrap();

        engine
            .initiate_redemption_single(&alice, 0, FuturesKind::Reward, 1_000, &alice, 0)
            .unwrap();

        // 5% fee: note and obligations carry 950, the splitter account 50.
        assert_eq!(receipt_balance(&engine, &alice), 9_000);
        assert_eq!(receipt_balance(&engine, &splitter_account()), 50);
        assert_eq!(engine.db.receipt_supply().unwrap(), 9_050);
        assert_eq!(
            engine.db.redemption_note(&alice, MAX_REDEMPTION_TIME).unwrap(),
            950
        );
        assert_eq!(
            engine.db.redemption_bucket(MAX_REDEMPTION_TIME).unwrap(),
            950
        );
        assert_eq!(engine.db.outstanding_redemptions().unwrap(), 950);
        assert_eq!(engine.splitter().total(Asset::Receipt), 50);

        // 8 futures rounds, gross amount each, starting next epoch.
        for round in 1..=8 {
            let epoch = round * EPOCH_DURATION;
            assert_eq!(
                engine
                    .db
                    .futures_note(FuturesKind::Reward, epoch, &alice)
                    .unwrap(),
                1_000,
                "futures note for round {round}"
            );
            assert_eq!(
                engine
                    .db
                    .futures_minted(FuturesKind::Reward, epoch)
                    .unwrap(),
                1_000
            );
        }
        assert_eq!(
            engine
                .db
                .futures_note(FuturesKind::Reward, 9 * EPOCH_DURATION, &alice)
                .unwrap(),
            0,
            "no ninth round"
        );
    }

    #[test]
    fn initiate_redemption_enforces_per_bucket_collateral() {
        let mut engine = test_engine("initiate_collateral");
        let alice = acct(1);
        seed_base(&engine, &alice, 100);
        engine.deposit(&alice, 10, &alice, false, 0).unwrap();

        // Gross request above the entry amount is rejected outright.
        let err = engine
            .initiate_redemption_single(&alice, 0, FuturesKind::Reward, 11, &alice, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            TidelockError::InsufficientRedemptionAllowance { requested: 11, .. }
        ));

        // The full entry can be redeemed once...
        engine
            .initiate_redemption_single(&alice, 0, FuturesKind::Reward, 10, &alice, 0)
            .unwrap();
        // ...after which the bucket has no gross allowance left, even though
        // the post-fee obligation is below the entry amount.
        let err = engine
            .initiate_redemption_single(&alice, 0, FuturesKind::Reward, 1, &alice, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            TidelockError::InsufficientRedemptionAllowance { .. }
        ));
    }

    #[test]
    fn initiate_redemption_batch_input_errors() {
        let mut engine = test_engine("initiate_inputs");
        let alice = acct(1);
        seed_base(&engine, &alice, 10);
        engine.deposit(&alice, 10, &alice, false, 0).unwrap();

        assert!(matches!(
            engine.initiate_redemption(&alice, &[], FuturesKind::Reward, &[], &alice, 0),
            Err(TidelockError::EmptyBatch)
        ));
        assert!(matches!(
            engine.initiate_redemption(&alice, &[0], FuturesKind::Reward, &[1, 2], &alice, 0),
            Err(TidelockError::MismatchedArrayLengths { left: 1, right: 2 })
        ));
        assert!(matches!(
            engine.initiate_redemption(&alice, &[5], FuturesKind::Reward, &[1], &alice, 0),
            Err(TidelockError::InvalidLockIndex { index: 5, count: 1 })
        ));
        assert!(matches!(
            engine.initiate_redemption(&alice, &[0], FuturesKind::Reward, &[0], &alice, 0),
            Err(TidelockError::ZeroAmount)
        ));
    }

    #[test]
    fn initiate_redemption_vote_kind_mints_vote_futures() {
        let mut engine = test_engine("initiate_vote");
        let alice = acct(1);
        seed_base(&engine, &alice, 10);
        engine.deposit(&alice, 10, &alice, false, 0).unwrap();

        engine
            .initiate_redemption_single(&alice, 0, FuturesKind::Vote, 10, &alice, 0)
            .unwrap();
        assert_eq!(
            engine.db.futures_note(FuturesKind::Vote, E1, &alice).unwrap(),
            10
        );
        assert_eq!(
            engine.db.futures_note(FuturesKind::Reward, E1, &alice).unwrap(),
            0
        );
    }

    // ── Redeem ────────────────────────────────────────────────────────────────

    #[test]
    fn redeem_before_unlock_fails() {
        let mut engine = test_engine("redeem_early");
        let alice = acct(1);
        seed_base(&engine, &alice, 10);
        engine.deposit(&alice, 10, &alice, false, 0).unwrap();
        engine
            .initiate_redemption_single(&alice, 0, FuturesKind::Reward, 10, &alice, 0)
            .unwrap();

        let err = engine
            .redeem(&alice, &[MAX_REDEMPTION_TIME], &[9], &alice, MAX_REDEMPTION_TIME - 1)
            .unwrap_err();
        assert!(matches!(err, TidelockError::BeforeUnlock { .. }));
    }

    #[test]
    fn redeem_pays_and_relocks_excess() {
        // Scenario: 50 unlockable, 10 outstanding — exactly 40 is relocked
        // and the redemption of 10 succeeds without further unlocking.
        let mut engine = test_engine_with("redeem_relock", zero_fees());
        let alice = acct(1);
        seed_base(&engine, &alice, 50);
        engine.deposit(&alice, 50, &alice, false, 0).unwrap();
        engine
            .initiate_redemption_single(&alice, 0, FuturesKind::Reward, 10, &alice, 0)
            .unwrap();
        assert_eq!(engine.db.outstanding_redemptions().unwrap(), 10);

        engine
            .redeem(&alice, &[MAX_REDEMPTION_TIME], &[10], &alice, MAX_REDEMPTION_TIME)
            .unwrap();

        assert_eq!(base_balance(&engine, &alice), 10);
        assert_eq!(engine.db.outstanding_redemptions().unwrap(), 0);
        assert_eq!(engine.db.on_hand().unwrap(), 0);
        assert_eq!(
            engine.db.redemption_note(&alice, MAX_REDEMPTION_TIME).unwrap(),
            0
        );
        let balances = engine
            .gateway()
            .locked_balances(MAX_REDEMPTION_TIME)
            .unwrap();
        assert_eq!(balances.locked, 40, "exactly the non-owed excess relocked");
    }

    #[test]
    fn redeem_insufficient_note_rejected() {
        let mut engine = test_engine_with("redeem_note", zero_fees());
        let alice = acct(1);
        let bob = acct(2);
        seed_base(&engine, &alice, 10);
        engine.deposit(&alice, 10, &alice, false, 0).unwrap();
        engine
            .initiate_redemption_single(&alice, 0, FuturesKind::Reward, 10, &alice, 0)
            .unwrap();

        // Bob holds no notes.
        let err = engine
            .redeem(&bob, &[MAX_REDEMPTION_TIME], &[1], &bob, MAX_REDEMPTION_TIME)
            .unwrap_err();
        assert!(matches!(
            err,
            TidelockError::InsufficientNoteBalance { need: 1, have: 0, .. }
        ));
    }

    #[test]
    fn redemption_fee_round_trip_at_fee_max() {
        // Deposit A then immediately redeem it all: exactly A*(1-fee_max)
        // comes back, with the fee applied once at initiation.
        let mut engine = test_engine("round_trip");
        let alice = acct(1);
        seed_base(&engine, &alice, 100_000);
        engine.deposit(&alice, 100_000, &alice, false, 0).unwrap();
        engine
            .initiate_redemption_single(&alice, 0, FuturesKind::Reward, 100_000, &alice, 0)
            .unwrap();
        engine
            .redeem(
                &alice,
                &[MAX_REDEMPTION_TIME],
                &[95_000],
                &alice,
                MAX_REDEMPTION_TIME,
            )
            .unwrap();
        assert_eq!(base_balance(&engine, &alice), 95_000);
    }

    // ── Stake / unstake ───────────────────────────────────────────────────────

    #[test]
    fn stake_unstake_round_trip() {
        let mut engine = test_engine("stake");
        let alice = acct(1);
        seed_base(&engine, &alice, 100);
        engine.deposit(&alice, 100, &alice, false, 0).unwrap();

        engine
            .stake(&alice, 2, FuturesKind::Reward, 40, &alice, 0)
            .unwrap();
        assert_eq!(receipt_balance(&engine, &alice), 60);
        assert_eq!(engine.db.receipt_supply().unwrap(), 60);
        assert_eq!(engine.db.stake_shares(E2, &alice).unwrap(), 40);
        // Futures for both covered epochs.
        assert_eq!(
            engine.db.futures_note(FuturesKind::Reward, E1, &alice).unwrap(),
            40
        );
        assert_eq!(
            engine.db.futures_note(FuturesKind::Reward, E2, &alice).unwrap(),
            40
        );

        let err = engine.unstake(&alice, E2, 40, &alice, E2 - 1).unwrap_err();
        assert!(matches!(err, TidelockError::BeforeStakingExpiry { .. }));

        engine.unstake(&alice, E2, 40, &alice, E2).unwrap();
        assert_eq!(receipt_balance(&engine, &alice), 100);
        assert_eq!(engine.db.receipt_supply().unwrap(), 100);
        assert_eq!(engine.db.stake_shares(E2, &alice).unwrap(), 0);
    }

    #[test]
    fn stake_validation() {
        let mut engine = test_engine("stake_validation");
        let alice = acct(1);
        seed_base(&engine, &alice, 10);
        engine.deposit(&alice, 10, &alice, false, 0).unwrap();

        assert!(matches!(
            engine.stake(&alice, 0, FuturesKind::Reward, 1, &alice, 0),
            Err(TidelockError::ZeroRounds)
        ));
        assert!(matches!(
            engine.stake(&alice, 1, FuturesKind::Reward, 0, &alice, 0),
            Err(TidelockError::ZeroAmount)
        ));
        assert!(matches!(
            engine.stake(&alice, 1, FuturesKind::Reward, 11, &alice, 0),
            Err(TidelockError::InsufficientBalance { .. })
        ));
    }

    // ── Epoch maintenance and reward claims ───────────────────────────────────

    #[test]
    fn maintenance_snapshots_and_records_rewards() {
        let mut engine = test_engine_with("maintenance", zero_fees());
        let alice = acct(1);
        let reward = token(0x10);
        seed_base(&engine, &alice, 20);
        engine.deposit(&alice, 20, &alice, false, 0).unwrap();
        engine.gateway_mut().accrue(reward, 100);

        engine.perform_epoch_maintenance(10).unwrap();

        let record = engine.db.get_epoch(0).unwrap().unwrap();
        assert_eq!(record.snapshot_id, 1);
        assert_eq!(record.reward_tokens, vec![reward]);
        // No futures outstanding: everything goes to snapshot holders.
        assert_eq!(record.snapshot_amounts, vec![100]);
        assert_eq!(record.futures_amounts, vec![0]);
        assert_eq!(engine.db.reward_pot(&reward).unwrap(), 100);
        assert_eq!(engine.db.snapshot_balance(1, &alice).unwrap(), 20);
        assert_eq!(engine.db.snapshot_supply(1).unwrap(), 20);
    }

    #[test]
    fn maintenance_is_idempotent_per_epoch() {
        let mut engine = test_engine_with("maintenance_idem", zero_fees());
        let alice = acct(1);
        let reward = token(0x10);
        seed_base(&engine, &alice, 20);
        engine.deposit(&alice, 20, &alice, false, 0).unwrap();

        engine.perform_epoch_maintenance(10).unwrap();
        engine.gateway_mut().accrue(reward, 60);
        engine.perform_epoch_maintenance(20).unwrap();
        engine.gateway_mut().accrue(reward, 40);
        engine.perform_epoch_maintenance(30).unwrap();

        let record = engine.db.get_epoch(0).unwrap().unwrap();
        assert_eq!(record.snapshot_id, 1, "snapshot id assigned once");
        assert_eq!(engine.db.snapshot_count().unwrap(), 1);
        assert_eq!(record.reward_tokens.len(), 1, "same token accumulates");
        assert_eq!(record.snapshot_amounts, vec![100]);

        // A new epoch takes a new snapshot.
        engine.perform_epoch_maintenance(E1).unwrap();
        assert_eq!(engine.db.get_epoch(E1).unwrap().unwrap().snapshot_id, 2);
    }

    #[test]
    fn snapshot_claim_requires_maintenance_first() {
        let mut engine = test_engine("maintenance_required");
        let alice = acct(1);
        seed_base(&engine, &alice, 20);
        engine.deposit(&alice, 20, &alice, false, 0).unwrap();

        let err = engine
            .claim_snapshot_reward(&alice, 0, 0, &alice)
            .unwrap_err();
        assert!(matches!(err, TidelockError::SnapshotRequired { epoch: 0 }));
    }

    #[test]
    fn snapshot_claim_pays_pro_rata_exactly_once() {
        let mut engine = test_engine_with("snapshot_claim", zero_fees());
        let alice = acct(1);
        let bob = acct(2);
        let reward = token(0x10);
        seed_base(&engine, &alice, 30);
        seed_base(&engine, &bob, 10);
        engine.deposit(&alice, 30, &alice, false, 0).unwrap();
        engine.deposit(&bob, 10, &bob, false, 0).unwrap();
        engine.gateway_mut().accrue(reward, 100);
        engine.perform_epoch_maintenance(10).unwrap();

        engine.claim_snapshot_reward(&alice, 0, 0, &alice).unwrap();
        assert_eq!(engine.db.token_balance(&reward, &alice).unwrap(), 75);
        assert_eq!(engine.db.reward_pot(&reward).unwrap(), 25);

        let err = engine
            .claim_snapshot_reward(&alice, 0, 0, &alice)
            .unwrap_err();
        assert!(matches!(
            err,
            TidelockError::AlreadyClaimed { epoch: 0, reward_index: 0 }
        ));

        engine.claim_snapshot_reward(&bob, 0, 0, &bob).unwrap();
        assert_eq!(engine.db.token_balance(&reward, &bob).unwrap(), 25);
        assert_eq!(engine.db.reward_pot(&reward).unwrap(), 0);
    }

    #[test]
    fn snapshot_claim_zero_balance_is_an_error() {
        let mut engine = test_engine_with("snapshot_zero", zero_fees());
        let alice = acct(1);
        let carol = acct(3);
        let reward = token(0x10);
        seed_base(&engine, &alice, 20);
        engine.deposit(&alice, 20, &alice, false, 0).unwrap();
        engine.gateway_mut().accrue(reward, 100);
        engine.perform_epoch_maintenance(10).unwrap();

        let err = engine
            .claim_snapshot_reward(&carol, 0, 0, &carol)
            .unwrap_err();
        assert!(matches!(
            err,
            TidelockError::InsufficientSnapshotBalance { epoch: 0 }
        ));
        assert!(matches!(
            engine.claim_snapshot_reward(&alice, 0, 7, &alice).unwrap_err(),
            TidelockError::InvalidRewardIndex { index: 7, count: 1 }
        ));
    }

    #[test]
    fn futures_claim_splits_reward_pool() {
        // Snapshot supply 20, futures supplies 2 and 3; a 100-token reward
        // splits 80/20, and the futures holders get 8 and 12.
        let mut engine = test_engine_with("futures_claim", zero_fees());
        let holder = acct(1);
        let ann = acct(2);
        let ben = acct(3);
        let reward = token(0x10);
        seed_base(&engine, &holder, 20);
        seed_base(&engine, &ann, 2);
        seed_base(&engine, &ben, 3);
        engine.deposit(&holder, 20, &holder, false, 0).unwrap();
        engine.deposit(&ann, 2, &ann, false, 0).unwrap();
        engine.deposit(&ben, 3, &ben, false, 0).unwrap();
        // Staking during epoch 0 burns the stakers' receipts and mints their
        // reward futures for epoch 1.
        engine.stake(&ann, 1, FuturesKind::Reward, 2, &ann, 10).unwrap();
        engine.stake(&ben, 1, FuturesKind::Reward, 3, &ben, 10).unwrap();

        engine.gateway_mut().accrue(reward, 100);
        engine.perform_epoch_maintenance(E1 + 10).unwrap();

        let record = engine.db.get_epoch(E1).unwrap().unwrap();
        assert_eq!(record.snapshot_amounts, vec![80]);
        assert_eq!(record.futures_amounts, vec![20]);

        // Claims open once the epoch has fully elapsed.
        let err = engine
            .claim_futures_rewards(&ann, E1, &ann, E1 + 10)
            .unwrap_err();
        assert!(matches!(err, TidelockError::EpochNotEnded { epoch: E1 }));

        engine.claim_futures_rewards(&ann, E1, &ann, E2).unwrap();
        assert_eq!(engine.db.token_balance(&reward, &ann).unwrap(), 8);
        assert_eq!(
            engine.db.futures_note(FuturesKind::Reward, E1, &ann).unwrap(),
            0,
            "entire balance burned on claim"
        );
        let err = engine
            .claim_futures_rewards(&ann, E1, &ann, E2)
            .unwrap_err();
        assert!(matches!(
            err,
            TidelockError::InsufficientFuturesBalance { epoch: E1 }
        ));

        engine.claim_futures_rewards(&ben, E1, &ben, E2).unwrap();
        assert_eq!(engine.db.token_balance(&reward, &ben).unwrap(), 12);
        assert_eq!(engine.db.reward_pot(&reward).unwrap(), 80, "snapshot pool intact");
    }

    #[test]
    fn external_reward_claim_records_into_epoch() {
        let mut engine = test_engine_with("external_claim", zero_fees());
        let alice = acct(1);
        let reward = token(0x20);
        seed_base(&engine, &alice, 20);
        engine.deposit(&alice, 20, &alice, false, 0).unwrap();

        // Fund the proof vault with a two-entry distribution.
        let leaves = vec![reward_leaf(&reward, 0, 70), reward_leaf(&reward, 1, 30)];
        let root = merkle_root(&leaves);
        engine.verifier_mut().fund(reward, root, 100);
        let proof = merkle_proof(&leaves, 0);

        // Maintenance must run first.
        let err = engine
            .claim_external_reward(&alice, reward, 0, 70, &proof, 10)
            .unwrap_err();
        assert!(matches!(err, TidelockError::SnapshotRequired { epoch: 0 }));

        engine.perform_epoch_maintenance(5).unwrap();
        engine
            .claim_external_reward(&alice, reward, 0, 70, &proof, 10)
            .unwrap();

        let record = engine.db.get_epoch(0).unwrap().unwrap();
        assert_eq!(record.reward_tokens, vec![reward]);
        assert_eq!(record.snapshot_amounts, vec![70]);
        assert_eq!(engine.db.reward_pot(&reward).unwrap(), 70);

        // The same token cannot be claimed twice into one epoch.
        let proof1 = merkle_proof(&leaves, 1);
        let err = engine
            .claim_external_reward(&alice, reward, 1, 30, &proof1, 20)
            .unwrap_err();
        assert!(matches!(err, TidelockError::DuplicateRewardToken { .. }));

        // A bad proof fails the whole operation with no state change.
        let other = token(0x21);
        let err = engine
            .claim_external_reward(&alice, other, 0, 70, &proof, 10)
            .unwrap_err();
        assert!(matches!(err, TidelockError::InvalidProof(_)));
        assert!(engine.db.get_epoch(0).unwrap().unwrap().reward_index(&other).is_none());
    }

    // ── Transfer ──────────────────────────────────────────────────────────────

    #[test]
    fn transfer_moves_receipt_tokens() {
        let mut engine = test_engine("transfer");
        let alice = acct(1);
        let bob = acct(2);
        seed_base(&engine, &alice, 10);
        engine.deposit(&alice, 10, &alice, false, 0).unwrap();

        engine.transfer(&alice, &bob, 4).unwrap();
        assert_eq!(receipt_balance(&engine, &alice), 6);
        assert_eq!(receipt_balance(&engine, &bob), 4);
        assert_eq!(engine.db.receipt_supply().unwrap(), 10);

        assert!(matches!(
            engine.transfer(&alice, &bob, 7),
            Err(TidelockError::InsufficientBalance { .. })
        ));
        // Self-transfer is a no-op on the balance.
        engine.transfer(&alice, &alice, 6).unwrap();
        assert_eq!(receipt_balance(&engine, &alice), 6);
    }

    // ── Administration ────────────────────────────────────────────────────────

    #[test]
    fn set_fees_is_owner_gated_and_validated() {
        let mut engine = test_engine("set_fees");
        let alice = acct(1);
        let fees = zero_fees();

        assert!(matches!(
            engine.set_fees(&alice, fees),
            Err(TidelockError::NotAuthorized)
        ));
        engine.set_fees(&owner(), fees).unwrap();
        assert_eq!(engine.fees().redemption_fee_max, 0);
        assert_eq!(engine.db.fee_config().unwrap().unwrap(), fees);

        let bad = FeeConfig {
            redemption_fee_max: 10,
            redemption_fee_min: 20,
            reward_fee: 0,
        };
        assert!(matches!(
            engine.set_fees(&owner(), bad),
            Err(TidelockError::FeeBoundsInverted { .. })
        ));
    }

    #[test]
    fn vote_delegation_round_trip() {
        let mut engine = test_engine("delegate");
        let delegate = acct(9);

        engine.set_vote_delegate(&owner(), &delegate).unwrap();
        assert_eq!(
            engine.delegates().delegate("tidelock.eth"),
            Some(&delegate)
        );

        engine.set_delegation_space(&owner(), "harbor.eth").unwrap();
        engine.set_vote_delegate(&owner(), &delegate).unwrap();
        assert_eq!(engine.delegates().delegate("harbor.eth"), Some(&delegate));

        engine.clear_vote_delegate(&owner()).unwrap();
        assert_eq!(engine.delegates().delegate("harbor.eth"), None);

        assert!(matches!(
            engine.set_delegation_space(&owner(), ""),
            Err(TidelockError::EmptyDelegationSpace)
        ));
    }

    // ── Emergency migration ───────────────────────────────────────────────────

    #[test]
    fn emergency_path_requires_pause_and_target() {
        let mut engine = test_engine("emergency_guards");
        let target = acct(7);

        assert!(matches!(
            engine.emergency_unlock(&owner()),
            Err(TidelockError::NotPaused)
        ));
        assert!(matches!(
            engine.set_migration(&owner(), &target),
            Err(TidelockError::NotPaused)
        ));

        engine.set_pause(&owner(), true).unwrap();
        assert!(matches!(
            engine.emergency_migrate_tokens(&owner(), &[Asset::Base]),
            Err(TidelockError::NoMigrationTarget)
        ));
        assert!(matches!(
            engine.emergency_unlock(&acct(1)),
            Err(TidelockError::NotAuthorized)
        ));
    }

    #[test]
    fn emergency_migration_sweeps_holdings() {
        let mut engine = test_engine_with("emergency_sweep", zero_fees());
        let alice = acct(1);
        let target = acct(7);
        let reward = token(0x10);
        seed_base(&engine, &alice, 50);
        engine.deposit(&alice, 50, &alice, false, 0).unwrap();
        engine.gateway_mut().accrue(reward, 100);
        engine.perform_epoch_maintenance(10).unwrap();

        engine.set_pause(&owner(), true).unwrap();
        engine.set_migration(&owner(), &target).unwrap();
        engine.emergency_unlock(&owner()).unwrap();
        assert_eq!(engine.db.on_hand().unwrap(), 50);

        engine
            .emergency_migrate_tokens(&owner(), &[Asset::Base, Asset::Reward(reward)])
            .unwrap();
        assert_eq!(base_balance(&engine, &target), 50);
        assert_eq!(engine.db.token_balance(&reward, &target).unwrap(), 100);
        assert_eq!(engine.db.on_hand().unwrap(), 0);
        assert_eq!(engine.db.reward_pot(&reward).unwrap(), 0);

        assert!(matches!(
            engine.emergency_migrate_tokens(&owner(), &[Asset::Receipt]),
            Err(TidelockError::UnsupportedAsset)
        ));
    }
}
