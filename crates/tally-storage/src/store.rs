//! # Ledger Store
//!
//! Authoritative in-memory state: accounts, the append-only transaction log,
//! stake positions and the ledger-wide supply counters.
//!
//! ## Store Transactions
//!
//! ```text
//!   transact(f) ──► try_write_for(lock_timeout) ──► timeout ──► Err(Contended)
//!                          │
//!                          ▼
//!                 StoreTxn { base: &LedgerState, stage }
//!                          │  f(txn): open_account / apply(batch) / put_position ...
//!                          ▼
//!                 f returned Ok ──► stage merged into state, lock released
//!                 f returned Err ──► stage dropped, state untouched
//! ```
//!
//! Every write inside a store transaction lands in the stage first. Reads
//! inside the transaction see the stage layered over the committed state,
//! so a multi-step operation observes its own earlier steps while other
//! readers never see a half-applied operation.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tally_core::{
    Account, AccountId, Amount, Bucket, Clock, LedgerError, Result, StakeId, StakePosition,
    SystemAccount, Transaction, TransactionDraft, TransactionId, TxKind,
};
use tracing::debug;

/// Ledger-wide counters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Everything ever minted
    pub total_supply: Amount,
    /// Minted and not burned
    pub circulating_supply: Amount,
    /// Everything ever burned
    pub burned_supply: Amount,
    /// Sequence of the last committed transaction (0 = empty log)
    pub sequence_counter: u64,
    /// Id the next stake position will receive
    pub next_position_id: u64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            total_supply: Amount::ZERO,
            circulating_supply: Amount::ZERO,
            burned_supply: Amount::ZERO,
            sequence_counter: 0,
            next_position_id: 1,
        }
    }
}

/// Committed ledger state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub accounts: BTreeMap<AccountId, Account>,
    pub transactions: Vec<Transaction>,
    pub positions: BTreeMap<StakeId, StakePosition>,
    pub counters: Counters,
}

impl LedgerState {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an account
    pub fn account(&self, id: &AccountId) -> Option<&Account> {
        self.accounts.get(id)
    }

    /// `Σ account.total`, `None` on overflow
    pub fn holdings(&self) -> Option<Amount> {
        self.accounts
            .values()
            .try_fold(Amount::ZERO, |acc, account| {
                account.checked_total().and_then(|total| acc.checked_add(total))
            })
    }

    /// `Σ account.total + burned_supply == total_supply`
    pub fn is_conserved(&self) -> bool {
        self.holdings()
            .and_then(|held| held.checked_add(self.counters.burned_supply))
            .map_or(false, |sum| sum == self.counters.total_supply)
    }

    /// Newest-first transactions touching an account
    pub fn history(&self, id: &AccountId, limit: usize) -> Vec<Transaction> {
        self.transactions
            .iter()
            .rev()
            .filter(|tx| tx.involves(id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Transactions with a sequence greater than `sequence`
    pub fn transactions_since(&self, sequence: u64) -> Vec<Transaction> {
        let start = self
            .transactions
            .partition_point(|tx| tx.sequence <= sequence);
        self.transactions[start..].to_vec()
    }

    /// All positions (any status) owned by an account
    pub fn positions_of(&self, owner: &AccountId) -> Vec<StakePosition> {
        self.positions
            .values()
            .filter(|p| &p.owner == owner)
            .cloned()
            .collect()
    }

    /// Summary counters
    pub fn stats(&self) -> LedgerStats {
        let active = self.positions.values().filter(|p| p.is_active());
        let (active_positions, total_staked) = active.fold((0usize, Amount::ZERO), |(n, sum), p| {
            (n + 1, sum.saturating_add(p.principal))
        });
        LedgerStats {
            total_supply: self.counters.total_supply,
            circulating_supply: self.counters.circulating_supply,
            burned_supply: self.counters.burned_supply,
            sequence: self.counters.sequence_counter,
            accounts: self.accounts.len(),
            transactions: self.transactions.len(),
            active_positions,
            total_staked,
        }
    }
}

/// Point-in-time ledger summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_supply: Amount,
    pub circulating_supply: Amount,
    pub burned_supply: Amount,
    pub sequence: u64,
    pub accounts: usize,
    pub transactions: usize,
    pub active_positions: usize,
    pub total_staked: Amount,
}

/// Direction of a balance change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delta {
    Credit(Amount),
    Debit(Amount),
}

/// One balance change on one bucket of one account
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub account: AccountId,
    pub bucket: Bucket,
    pub delta: Delta,
}

/// Supply effect of a batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SupplyChange {
    #[default]
    Unchanged,
    Mint(Amount),
    Burn(Amount),
}

/// Balance deltas, supply change and the single log entry they produce
#[derive(Clone, Debug)]
pub struct Batch {
    pub mutations: Vec<Mutation>,
    pub supply: SupplyChange,
    pub record: TransactionDraft,
}

impl Batch {
    /// Start a batch that will be logged as `record`
    pub fn new(record: TransactionDraft) -> Self {
        Self {
            mutations: Vec::new(),
            supply: SupplyChange::Unchanged,
            record,
        }
    }

    /// Add to a bucket
    pub fn credit(mut self, account: impl Into<AccountId>, bucket: Bucket, amount: Amount) -> Self {
        self.mutations.push(Mutation {
            account: account.into(),
            bucket,
            delta: Delta::Credit(amount),
        });
        self
    }

    /// Take from a bucket
    pub fn debit(mut self, account: impl Into<AccountId>, bucket: Bucket, amount: Amount) -> Self {
        self.mutations.push(Mutation {
            account: account.into(),
            bucket,
            delta: Delta::Debit(amount),
        });
        self
    }

    /// Issue new supply
    pub fn mint(mut self, amount: Amount) -> Self {
        self.supply = SupplyChange::Mint(amount);
        self
    }

    /// Destroy supply
    pub fn burn(mut self, amount: Amount) -> Self {
        self.supply = SupplyChange::Burn(amount);
        self
    }
}

/// Store tuning
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// One-time credit for new non-system accounts, drawn from the rewards pool
    pub welcome_bonus: Amount,
    /// How long a writer waits for the ledger lock
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            welcome_bonus: Amount::ZERO,
            lock_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Debug)]
struct Stage {
    accounts: BTreeMap<AccountId, Account>,
    positions: BTreeMap<StakeId, StakePosition>,
    transactions: Vec<Transaction>,
    counters: Counters,
}

impl Stage {
    fn over(base: &LedgerState) -> Self {
        Self {
            accounts: BTreeMap::new(),
            positions: BTreeMap::new(),
            transactions: Vec::new(),
            counters: base.counters,
        }
    }

    fn merge_into(self, state: &mut LedgerState) {
        state.accounts.extend(self.accounts);
        state.positions.extend(self.positions);
        state.transactions.extend(self.transactions);
        state.counters = self.counters;
    }
}

/// An open, exclusive unit of work against the ledger
pub struct StoreTxn<'a> {
    base: &'a LedgerState,
    stage: Stage,
    now: DateTime<Utc>,
    welcome_bonus: Amount,
}

impl<'a> StoreTxn<'a> {
    fn new(base: &'a LedgerState, now: DateTime<Utc>, welcome_bonus: Amount) -> Self {
        Self {
            base,
            stage: Stage::over(base),
            now,
            welcome_bonus,
        }
    }

    /// Time every entry in this transaction is stamped with
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Counters including staged changes
    pub fn counters(&self) -> Counters {
        self.stage.counters
    }

    /// Look up an account without creating it
    pub fn account(&self, id: &AccountId) -> Option<&Account> {
        self.stage
            .accounts
            .get(id)
            .or_else(|| self.base.accounts.get(id))
    }

    /// Look up an account, creating it (plus welcome credit) if missing
    pub fn open_account(&mut self, id: &AccountId) -> Result<&Account> {
        self.ensure_account(id)?;
        self.account(id)
            .ok_or_else(|| LedgerError::AccountNotFound(id.clone()))
    }

    /// Edit non-balance fields of an existing account
    pub fn update_account(&mut self, id: &AccountId, edit: impl FnOnce(&mut Account)) -> Result<()> {
        let mut account = self
            .account(id)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(id.clone()))?;
        edit(&mut account);
        self.stage.accounts.insert(id.clone(), account);
        Ok(())
    }

    /// Apply a batch and append its transaction. On error the transaction
    /// is left exactly as before the call.
    pub fn apply(&mut self, batch: Batch) -> Result<TransactionId> {
        let checkpoint = self.stage.clone();
        match self.apply_batch(batch) {
            Ok(id) => Ok(id),
            Err(err) => {
                self.stage = checkpoint;
                Err(err)
            }
        }
    }

    /// Look up a position
    pub fn position(&self, id: StakeId) -> Option<&StakePosition> {
        self.stage
            .positions
            .get(&id)
            .or_else(|| self.base.positions.get(&id))
    }

    /// Insert or replace a position
    pub fn put_position(&mut self, position: StakePosition) {
        self.stage.positions.insert(position.id, position);
    }

    /// Reserve the next position id
    pub fn allocate_position_id(&mut self) -> StakeId {
        let id = self.stage.counters.next_position_id.max(1);
        self.stage.counters.next_position_id = id + 1;
        StakeId::new(id)
    }

    /// Positions (any status) owned by an account
    pub fn positions_of(&self, owner: &AccountId) -> Vec<StakePosition> {
        let mut merged: BTreeMap<StakeId, &StakePosition> = self
            .base
            .positions
            .iter()
            .filter(|(_, p)| &p.owner == owner)
            .map(|(id, p)| (*id, p))
            .collect();
        for (id, p) in self.stage.positions.iter().filter(|(_, p)| &p.owner == owner) {
            merged.insert(*id, p);
        }
        merged.into_values().cloned().collect()
    }

    /// Sum of mint transactions stamped on `day` (UTC)
    pub fn minted_on(&self, day: NaiveDate) -> Amount {
        let staged = minted_on(self.stage.transactions.iter().rev(), day);
        let committed = minted_on(self.base.transactions.iter().rev(), day);
        staged.saturating_add(committed)
    }

    fn ensure_account(&mut self, id: &AccountId) -> Result<()> {
        if id.is_empty() {
            return Err(LedgerError::AccountNotFound(id.clone()));
        }
        if self.account(id).is_some() {
            return Ok(());
        }

        self.stage
            .accounts
            .insert(id.clone(), Account::new(id.clone(), self.now));
        debug!(account = %id, "Opened account");

        let bonus = self.welcome_bonus;
        if id.is_system() || bonus.is_zero() {
            return Ok(());
        }

        let pool = SystemAccount::RewardsPool.id();
        let funded = self
            .account(&pool)
            .map_or(false, |a| !a.hold && a.available >= bonus);
        if !funded {
            debug!(account = %id, "Rewards pool cannot cover welcome credit, skipping");
            return Ok(());
        }

        let record = TransactionDraft::new(TxKind::Reward, pool.clone(), id.clone(), bonus, "welcome bonus");
        let batch = Batch::new(record)
            .debit(pool, Bucket::Available, bonus)
            .credit(id.clone(), Bucket::Available, bonus);
        self.apply_batch(batch).map(|_| ())
    }

    fn apply_batch(&mut self, batch: Batch) -> Result<TransactionId> {
        for mutation in &batch.mutations {
            self.ensure_account(&mutation.account)?;
        }

        // Validate on copies; nothing reaches the stage until every check passes.
        let mut working: BTreeMap<AccountId, Account> = BTreeMap::new();
        let mut flows: BTreeMap<AccountId, (Amount, Amount)> = BTreeMap::new();

        for mutation in &batch.mutations {
            let account = match working.entry(mutation.account.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let current = self
                        .account(&mutation.account)
                        .ok_or_else(|| LedgerError::AccountNotFound(mutation.account.clone()))?;
                    if current.hold {
                        return Err(LedgerError::AccountFrozen(mutation.account.clone()));
                    }
                    entry.insert(current.clone())
                }
            };

            let flow = flows
                .entry(mutation.account.clone())
                .or_insert((Amount::ZERO, Amount::ZERO));
            let balance = account.bucket_mut(mutation.bucket);
            let current = *balance;

            match mutation.delta {
                Delta::Credit(amount) => {
                    *balance = current
                        .checked_add(amount)
                        .ok_or(LedgerError::ArithmeticOverflow)?;
                    flow.0 = flow.0.saturating_add(amount);
                }
                Delta::Debit(amount) => {
                    *balance = current.checked_sub(amount).ok_or_else(|| {
                        LedgerError::InsufficientFunds {
                            account: mutation.account.clone(),
                            required: amount,
                            available: current,
                        }
                    })?;
                    flow.1 = flow.1.saturating_add(amount);
                }
            }
        }

        for (id, (credited, debited)) in flows {
            if let Some(account) = working.get_mut(&id) {
                if credited > debited {
                    account.total_earned = account.total_earned.saturating_add(credited.saturating_sub(debited));
                } else {
                    account.total_spent = account.total_spent.saturating_add(debited.saturating_sub(credited));
                }
                account.last_activity = self.now;
            }
        }

        let mut counters = self.stage.counters;
        match batch.supply {
            SupplyChange::Unchanged => {}
            SupplyChange::Mint(amount) => {
                counters.total_supply = counters
                    .total_supply
                    .checked_add(amount)
                    .ok_or(LedgerError::ArithmeticOverflow)?;
                counters.circulating_supply = counters
                    .circulating_supply
                    .checked_add(amount)
                    .ok_or(LedgerError::ArithmeticOverflow)?;
            }
            SupplyChange::Burn(amount) => {
                counters.circulating_supply = counters
                    .circulating_supply
                    .checked_sub(amount)
                    .ok_or(LedgerError::ArithmeticOverflow)?;
                counters.burned_supply = counters
                    .burned_supply
                    .checked_add(amount)
                    .ok_or(LedgerError::ArithmeticOverflow)?;
            }
        }
        counters.sequence_counter = counters
            .sequence_counter
            .checked_add(1)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        let tx = Transaction::seal(batch.record, counters.sequence_counter, self.now);
        let id = tx.id.clone();
        debug!(sequence = tx.sequence, kind = %tx.kind, amount = %tx.amount, "Staged transaction");

        self.stage.accounts.extend(working);
        self.stage.counters = counters;
        self.stage.transactions.push(tx);
        Ok(id)
    }

    fn into_stage(self) -> Stage {
        self.stage
    }
}

fn minted_on<'t>(newest_first: impl Iterator<Item = &'t Transaction>, day: NaiveDate) -> Amount {
    newest_first
        .take_while(|tx| tx.timestamp.date_naive() >= day)
        .filter(|tx| tx.kind == TxKind::Mint && tx.timestamp.date_naive() == day)
        .fold(Amount::ZERO, |sum, tx| sum.saturating_add(tx.amount))
}

/// Thread-safe ledger store
pub struct LedgerStore {
    state: RwLock<LedgerState>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
}

impl LedgerStore {
    /// Empty ledger
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_state(LedgerState::new(), config, clock)
    }

    /// Ledger over existing state
    pub fn with_state(state: LedgerState, config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(state),
            config,
            clock,
        }
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shared clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time per the store clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `f` as one exclusive, all-or-nothing store transaction
    pub fn transact<T>(&self, f: impl FnOnce(&mut StoreTxn<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self
            .state
            .try_write_for(self.config.lock_timeout)
            .ok_or(LedgerError::Contended)?;
        // Commit timestamps never run backwards, even if the clock does
        let now = self.clock.now();
        let now = guard.transactions.last().map_or(now, |last| last.timestamp.max(now));

        let (value, stage) = {
            let mut txn = StoreTxn::new(&guard, now, self.config.welcome_bonus);
            let value = f(&mut txn)?;
            (value, txn.into_stage())
        };

        let appended = stage.transactions.len();
        stage.merge_into(&mut guard);
        if appended > 0 {
            debug!(
                appended,
                sequence = guard.counters.sequence_counter,
                "Committed store transaction"
            );
        }
        Ok(value)
    }

    /// Consistent read-only view
    pub fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T> {
        let guard = self
            .state
            .try_read_for(self.config.lock_timeout)
            .ok_or(LedgerError::Contended)?;
        Ok(f(&guard))
    }

    /// Fetch an account, creating it (plus welcome credit) if missing
    pub fn get_account(&self, id: &AccountId) -> Result<Account> {
        if let Some(account) = self.read(|state| state.account(id).cloned())? {
            return Ok(account);
        }
        self.transact(|txn| txn.open_account(id).cloned())
    }

    /// Fetch an account without creating it
    pub fn account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.read(|state| state.account(id).cloned())
    }

    /// Newest-first history for an account
    pub fn history(&self, id: &AccountId, limit: usize) -> Result<Vec<Transaction>> {
        self.read(|state| state.history(id, limit))
    }

    /// Log tail after `sequence`
    pub fn transactions_since(&self, sequence: u64) -> Result<Vec<Transaction>> {
        self.read(|state| state.transactions_since(sequence))
    }

    /// Active and closed positions of an owner
    pub fn positions_of(&self, owner: &AccountId) -> Result<Vec<StakePosition>> {
        self.read(|state| state.positions_of(owner))
    }

    /// Summary counters
    pub fn stats(&self) -> Result<LedgerStats> {
        self.read(LedgerState::stats)
    }

    /// Engage or release an account hold
    pub fn set_hold(&self, id: &AccountId, hold: bool) -> Result<()> {
        self.transact(|txn| txn.update_account(id, |account| account.hold = hold))
    }

    /// Replace the whole state
    pub(crate) fn replace_state(&self, state: LedgerState) -> Result<()> {
        let mut guard = self
            .state
            .try_write_for(self.config.lock_timeout)
            .ok_or(LedgerError::Contended)?;
        *guard = state;
        Ok(())
    }
}
