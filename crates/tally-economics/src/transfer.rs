//! # Transfer Engine
//!
//! Peer-to-peer transfers with a treasury fee, supply issuance and burning.
//!
//! | Operation | Debits | Credits | Supply |
//! |-----------|--------|---------|--------|
//! | transfer | `from.available` by amount + fee | `to.available` by amount, treasury by fee | - |
//! | mint | - | `to.available` | total, circulating up |
//! | burn | `from.available` | - | circulating down, burned up |
//! | system transfer | `from.available` | `to.available` | - |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_core::{
    AccountId, Amount, Bucket, LedgerError, Rate, Result, SystemAccount, TransactionDraft,
    TransactionId, TxKind,
};
use tally_storage::{Batch, LedgerStore, StoreTxn};
use tracing::info;

/// Supply and fee policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPolicy {
    /// Transfer fee in basis points (100 = 1%)
    #[serde(default = "default_transfer_fee_bps")]
    pub transfer_fee_bps: u32,

    /// Hard cap on total supply
    #[serde(default = "default_max_supply")]
    pub max_supply: Amount,

    /// Mint allowance per UTC day
    #[serde(default = "default_daily_mint_limit")]
    pub daily_mint_limit: Amount,
}

fn default_transfer_fee_bps() -> u32 {
    100
}
fn default_max_supply() -> Amount {
    Amount::from_tokens(1_000_000_000)
}
fn default_daily_mint_limit() -> Amount {
    Amount::from_tokens(10_000_000)
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            transfer_fee_bps: default_transfer_fee_bps(),
            max_supply: default_max_supply(),
            daily_mint_limit: default_daily_mint_limit(),
        }
    }
}

impl TokenPolicy {
    /// Fee rate as a ratio
    pub fn fee_rate(&self) -> Rate {
        Rate::from_bps(self.transfer_fee_bps)
    }

    /// Fee charged on top of `amount`
    pub fn fee_for(&self, amount: Amount) -> Result<Amount> {
        amount
            .checked_mul_rate(self.fee_rate())
            .ok_or(LedgerError::ArithmeticOverflow)
    }
}

/// Fee-free movement between two accounts inside an open store transaction.
///
/// Staking payouts, referral bonuses and pool funding all go through here.
pub fn system_transfer(
    txn: &mut StoreTxn<'_>,
    from: &AccountId,
    to: &AccountId,
    amount: Amount,
    kind: TxKind,
    note: &str,
) -> Result<TransactionId> {
    if amount.is_zero() {
        return Err(LedgerError::InvalidAmount("amount must be positive".into()));
    }
    if from == to {
        return Err(LedgerError::InvalidAmount("cannot transfer to the same account".into()));
    }

    let record = TransactionDraft::new(kind, from.clone(), to.clone(), amount, note);
    txn.apply(
        Batch::new(record)
            .debit(from.clone(), Bucket::Available, amount)
            .credit(to.clone(), Bucket::Available, amount),
    )
}

/// Transfers, minting and burning against the ledger store
pub struct TransferEngine {
    store: Arc<LedgerStore>,
    policy: TokenPolicy,
}

impl TransferEngine {
    pub fn new(store: Arc<LedgerStore>, policy: TokenPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Move `amount` from one account to another; the sender also pays the fee
    pub fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
        note: &str,
    ) -> Result<TransactionId> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount("amount must be positive".into()));
        }
        if from == to {
            return Err(LedgerError::InvalidAmount("cannot transfer to the same account".into()));
        }

        let fee = self.policy.fee_for(amount)?;
        let debit = amount.checked_add(fee).ok_or(LedgerError::ArithmeticOverflow)?;

        let id = self.store.transact(|txn| {
            let record = TransactionDraft::new(TxKind::Transfer, from.clone(), to.clone(), amount, note)
                .with_fee(fee);
            let mut batch = Batch::new(record)
                .debit(from.clone(), Bucket::Available, debit)
                .credit(to.clone(), Bucket::Available, amount);
            if !fee.is_zero() {
                batch = batch.credit(SystemAccount::Treasury, Bucket::Available, fee);
            }
            txn.apply(batch)
        })?;

        info!(tx = %id, %from, %to, %amount, %fee, "Transfer committed");
        Ok(id)
    }

    /// Issue new tokens
    pub fn mint(&self, to: &AccountId, amount: Amount, reason: &str) -> Result<TransactionId> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount("amount must be positive".into()));
        }

        let id = self.store.transact(|txn| {
            self.check_supply_cap(txn, amount)?;
            self.check_daily_limit(txn, txn.now(), amount)?;
            mint_in(txn, to, amount, reason)
        })?;

        info!(tx = %id, %to, %amount, reason, "Mint committed");
        Ok(id)
    }

    /// Destroy tokens held by `from`
    pub fn burn(&self, from: &AccountId, amount: Amount, reason: &str) -> Result<TransactionId> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount("amount must be positive".into()));
        }

        let id = self.store.transact(|txn| {
            let record = TransactionDraft::new(
                TxKind::Burn,
                from.clone(),
                SystemAccount::BurnSink,
                amount,
                reason,
            );
            txn.apply(
                Batch::new(record)
                    .debit(from.clone(), Bucket::Available, amount)
                    .burn(amount),
            )
        })?;

        info!(tx = %id, %from, %amount, reason, "Burn committed");
        Ok(id)
    }

    /// Standalone fee-free transfer between accounts
    pub fn system_transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
        kind: TxKind,
        note: &str,
    ) -> Result<TransactionId> {
        let id = self
            .store
            .transact(|txn| system_transfer(txn, from, to, amount, kind, note))?;
        info!(tx = %id, %from, %to, %amount, %kind, "System transfer committed");
        Ok(id)
    }

    /// Mint initial allocations into an empty ledger.
    ///
    /// Respects the supply cap but not the daily mint limit. Zero entries are
    /// skipped.
    pub fn allocate_genesis(&self, allocations: &[(AccountId, Amount)]) -> Result<Vec<TransactionId>> {
        let ids = self.store.transact(|txn| {
            if txn.counters().sequence_counter != 0 {
                return Err(LedgerError::InvalidAmount(
                    "genesis allocation requires an empty ledger".into(),
                ));
            }
            let mut ids = Vec::with_capacity(allocations.len());
            for (account, amount) in allocations.iter().filter(|(_, a)| !a.is_zero()) {
                self.check_supply_cap(txn, *amount)?;
                ids.push(mint_in(txn, account, *amount, "genesis allocation")?);
            }
            Ok(ids)
        })?;

        info!(allocations = ids.len(), "Genesis allocation committed");
        Ok(ids)
    }

    fn check_supply_cap(&self, txn: &StoreTxn<'_>, amount: Amount) -> Result<()> {
        let remaining = self
            .policy
            .max_supply
            .saturating_sub(txn.counters().total_supply);
        if amount > remaining {
            return Err(LedgerError::SupplyCapExceeded {
                requested: amount,
                remaining,
            });
        }
        Ok(())
    }

    fn check_daily_limit(&self, txn: &StoreTxn<'_>, now: DateTime<Utc>, amount: Amount) -> Result<()> {
        let minted_today = txn.minted_on(now.date_naive());
        let remaining = self.policy.daily_mint_limit.saturating_sub(minted_today);
        if amount > remaining {
            return Err(LedgerError::DailyMintLimitExceeded {
                requested: amount,
                remaining,
            });
        }
        Ok(())
    }
}

fn mint_in(txn: &mut StoreTxn<'_>, to: &AccountId, amount: Amount, reason: &str) -> Result<TransactionId> {
    let record = TransactionDraft::new(TxKind::Mint, SystemAccount::Treasury, to.clone(), amount, reason);
    txn.apply(
        Batch::new(record)
            .credit(to.clone(), Bucket::Available, amount)
            .mint(amount),
    )
}
