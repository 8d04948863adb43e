//! # Staking Engine
//!
//! Time-accrued staking rewards paid from the staking-pool reserve.
//!
//! ## Reward Formula
//!
//! ```text
//! reward = principal × apy × multiplier × elapsed_seconds / 31_536_000
//! multiplier = pool bonus + 0.1 × lock_days / 365
//! ```
//!
//! Computed in integer arithmetic with a single truncation per step. Rewards
//! only accrue on active positions and never while the clock reads earlier
//! than the last claim.
//!
//! ## Default Pools
//!
//! | Pool | APY | Minimum | Default Lock | Bonus | Gate |
//! |------|-----|---------|--------------|-------|------|
//! | basic | 30% | 10 | 0 days | 1.0x | open |
//! | premium | 45% | 100 | 30 days | 1.2x | premium capability |
//! | whale | 35% | 10,000 | 90 days | 1.1x | 50,000 held |

use crate::distribution::{DistributionSchedule, SweepReport};
use crate::transfer::system_transfer;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tally_core::constants::{MAX_DISTRIBUTION_INTERVAL_SECS, SECONDS_PER_YEAR};
use tally_core::{
    Account, AccountId, Amount, Bucket, Capability, LedgerError, Rate, Result, StakeId,
    StakePosition, SystemAccount, TransactionDraft, TxKind, RATE_SCALE,
};
use tally_storage::{Batch, LedgerStore, StoreTxn};
use tracing::{debug, info, warn};

/// Who may stake in a pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Eligibility {
    /// Anyone
    #[default]
    Open,
    /// Accounts holding a capability
    Capability { capability: Capability },
    /// Accounts whose total balance reaches a threshold
    MinimumBalance { amount: Amount },
}

impl Eligibility {
    pub fn admits(&self, account: &Account) -> bool {
        match self {
            Self::Open => true,
            Self::Capability { capability } => account.has(*capability),
            Self::MinimumBalance { amount } => account.total() >= *amount,
        }
    }
}

/// Staking pool parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,

    /// Annual yield in basis points (3000 = 30%)
    pub apy_bps: u32,

    #[serde(default)]
    pub minimum_stake: Amount,

    /// Lock applied when the caller does not choose one
    #[serde(default)]
    pub lock_days_default: u32,

    /// Base multiplier in basis points (10_000 = 1.0x)
    #[serde(default = "default_multiplier_bonus_bps")]
    pub multiplier_bonus_bps: u32,

    #[serde(default = "default_max_lock_days")]
    pub max_lock_days: u32,

    #[serde(default)]
    pub eligibility: Eligibility,
}

fn default_multiplier_bonus_bps() -> u32 {
    10_000
}
fn default_max_lock_days() -> u32 {
    365
}

impl PoolConfig {
    pub fn apy(&self) -> Rate {
        Rate::from_bps(self.apy_bps)
    }

    /// `bonus + 0.1 × lock_days / 365`
    pub fn multiplier_for(&self, lock_days: u32) -> Rate {
        let lock_bonus = RATE_SCALE / 10 * u64::from(lock_days) / 365;
        Rate::from_bps(self.multiplier_bonus_bps)
            .checked_add(Rate::from_ppm(lock_bonus))
            .unwrap_or(Rate::from_ppm(u64::MAX))
    }

    /// Built-in pool set
    pub fn defaults() -> Vec<PoolConfig> {
        vec![
            PoolConfig {
                name: "basic".into(),
                apy_bps: 3000,
                minimum_stake: Amount::from_tokens(10),
                lock_days_default: 0,
                multiplier_bonus_bps: 10_000,
                max_lock_days: 365,
                eligibility: Eligibility::Open,
            },
            PoolConfig {
                name: "premium".into(),
                apy_bps: 4500,
                minimum_stake: Amount::from_tokens(100),
                lock_days_default: 30,
                multiplier_bonus_bps: 12_000,
                max_lock_days: 730,
                eligibility: Eligibility::Capability {
                    capability: Capability::Premium,
                },
            },
            PoolConfig {
                name: "whale".into(),
                apy_bps: 3500,
                minimum_stake: Amount::from_tokens(10_000),
                lock_days_default: 90,
                multiplier_bonus_bps: 11_000,
                max_lock_days: 730,
                eligibility: Eligibility::MinimumBalance {
                    amount: Amount::from_tokens(50_000),
                },
            },
        ]
    }
}

/// Reward accrued on a position at `now` under the given APY.
pub fn accrued_reward(position: &StakePosition, apy: Rate, now: DateTime<Utc>) -> Result<Amount> {
    if !position.is_active() {
        return Ok(Amount::ZERO);
    }
    let seconds = position.accrual_seconds(now);
    if seconds == 0 {
        return Ok(Amount::ZERO);
    }

    let scale = u128::from(RATE_SCALE) * u128::from(RATE_SCALE);
    let rate = u128::from(apy.ppm()) * u128::from(position.multiplier.ppm());
    position
        .principal
        .checked_mul_div(rate, scale)
        .and_then(|annual| annual.checked_mul_div(u128::from(seconds), u128::from(SECONDS_PER_YEAR)))
        .ok_or(LedgerError::ArithmeticOverflow)
}

/// Which positions a claim settles
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimTarget {
    All,
    One(StakeId),
}

/// Result of an unstake
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeOutcome {
    /// Principal moved back to available
    pub returned: Amount,
    /// Pending reward settled on the way out
    pub rewards_claimed: Amount,
    /// Position is now closed
    pub closed: bool,
}

enum SweepOutcome {
    Paid(Amount),
    Empty,
    Retired,
}

/// Stake positions, reward settlement and the distribution sweep
pub struct StakingEngine {
    store: Arc<LedgerStore>,
    pools: BTreeMap<String, PoolConfig>,
    interval: Duration,
    schedule: Mutex<DistributionSchedule>,
}

impl StakingEngine {
    /// Create the engine and index existing active positions
    pub fn new(store: Arc<LedgerStore>, pools: Vec<PoolConfig>, interval: Duration) -> Result<Self> {
        let engine = Self {
            store,
            pools: pools.into_iter().map(|p| (p.name.clone(), p)).collect(),
            interval: interval.clamp(
                Duration::seconds(1),
                Duration::seconds(MAX_DISTRIBUTION_INTERVAL_SECS as i64),
            ),
            schedule: Mutex::new(DistributionSchedule::new()),
        };
        engine.rebuild_schedule()?;
        Ok(engine)
    }

    /// Configured pool by name
    pub fn pool(&self, name: &str) -> Result<&PoolConfig> {
        self.pools
            .get(name)
            .ok_or_else(|| LedgerError::UnknownPool(name.to_string()))
    }

    pub fn pools(&self) -> impl Iterator<Item = &PoolConfig> {
        self.pools.values()
    }

    /// When a position last settled at `from` is next due
    fn next_due(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        from.checked_add_signed(self.interval).ok_or(LedgerError::ArithmeticOverflow)
    }

    /// Open a position, moving `amount` from available to staked
    pub fn stake(
        &self,
        owner: &AccountId,
        pool_name: &str,
        amount: Amount,
        lock_days: Option<u32>,
    ) -> Result<StakeId> {
        let pool = self.pool(pool_name)?;
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount("stake must be positive".into()));
        }
        if amount < pool.minimum_stake {
            return Err(LedgerError::BelowMinimumStake {
                minimum: pool.minimum_stake,
                amount,
            });
        }
        let lock_days = lock_days.unwrap_or(pool.lock_days_default);
        if lock_days > pool.max_lock_days {
            return Err(LedgerError::InvalidAmount(format!(
                "lock of {lock_days} days exceeds pool maximum of {}",
                pool.max_lock_days
            )));
        }
        let multiplier = pool.multiplier_for(lock_days);

        let (position, due) = self.store.transact(|txn| {
            let account = txn
                .account(owner)
                .ok_or_else(|| LedgerError::AccountNotFound(owner.clone()))?;
            if !pool.eligibility.admits(account) {
                return Err(LedgerError::PoolIneligible {
                    pool: pool.name.clone(),
                    account: owner.clone(),
                });
            }

            let id = txn.allocate_position_id();
            let record = TransactionDraft::new(
                TxKind::Stake,
                owner.clone(),
                owner.clone(),
                amount,
                format!("stake {id} in {}", pool.name),
            );
            txn.apply(
                Batch::new(record)
                    .debit(owner.clone(), Bucket::Available, amount)
                    .credit(owner.clone(), Bucket::Staked, amount),
            )?;

            let position = StakePosition::open(
                id,
                owner.clone(),
                pool.name.clone(),
                amount,
                lock_days,
                multiplier,
                txn.now(),
            );
            position.unlocks_at().ok_or(LedgerError::ArithmeticOverflow)?;
            let due = self.next_due(position.last_claim_time)?;
            txn.put_position(position.clone());
            Ok((position, due))
        })?;

        self.schedule.lock().schedule(position.id, due);
        info!(
            position = %position.id,
            %owner,
            pool = pool_name,
            %amount,
            lock_days,
            multiplier = %position.multiplier,
            "Stake opened"
        );
        Ok(position.id)
    }

    /// Reward a position would pay if settled now
    pub fn pending_reward(&self, id: StakeId) -> Result<Amount> {
        let now = self.store.now();
        let position = self
            .store
            .read(|state| state.positions.get(&id).cloned())?
            .ok_or(LedgerError::PositionNotFound(id))?;
        if !position.is_active() {
            return Ok(Amount::ZERO);
        }
        accrued_reward(&position, self.pool(&position.pool)?.apy(), now)
    }

    /// Total pending across an owner's active positions
    pub fn pending_for(&self, owner: &AccountId) -> Result<Amount> {
        let now = self.store.now();
        self.store
            .positions_of(owner)?
            .iter()
            .filter(|p| p.is_active())
            .try_fold(Amount::ZERO, |sum, p| {
                let reward = accrued_reward(p, self.pool(&p.pool)?.apy(), now)?;
                sum.checked_add(reward).ok_or(LedgerError::ArithmeticOverflow)
            })
    }

    /// Pay pending rewards to the owner
    pub fn claim(&self, owner: &AccountId, target: ClaimTarget) -> Result<Amount> {
        let (total, settled) = self.store.transact(|txn| {
            txn.account(owner)
                .ok_or_else(|| LedgerError::AccountNotFound(owner.clone()))?;
            let positions = match target {
                ClaimTarget::All => txn
                    .positions_of(owner)
                    .into_iter()
                    .filter(|p| p.is_active())
                    .collect(),
                ClaimTarget::One(id) => vec![owned_position(txn, owner, id)?],
            };

            let mut total = Amount::ZERO;
            let mut settled = Vec::with_capacity(positions.len());
            for mut position in positions {
                let reward = self.settle(txn, &mut position)?;
                total = total.checked_add(reward).ok_or(LedgerError::ArithmeticOverflow)?;
                settled.push((position.id, self.next_due(position.last_claim_time)?));
            }
            if total.is_zero() {
                return Err(LedgerError::NothingToClaim);
            }
            Ok((total, settled))
        })?;

        let mut schedule = self.schedule.lock();
        for (id, due) in settled {
            schedule.schedule(id, due);
        }
        info!(%owner, amount = %total, "Rewards claimed");
        Ok(total)
    }

    /// Fold pending reward into the position's principal
    pub fn compound(&self, owner: &AccountId, id: StakeId) -> Result<Amount> {
        let (reward, due) = self.store.transact(|txn| {
            txn.account(owner)
                .ok_or_else(|| LedgerError::AccountNotFound(owner.clone()))?;
            let mut position = owned_position(txn, owner, id)?;
            let now = txn.now();
            let reward = accrued_reward(&position, self.pool(&position.pool)?.apy(), now)?;
            if reward.is_zero() {
                return Err(LedgerError::NothingToClaim);
            }

            let pool = SystemAccount::StakingPool.id();
            let record = TransactionDraft::new(
                TxKind::Compound,
                pool.clone(),
                owner.clone(),
                reward,
                format!("compound {id}"),
            );
            txn.apply(
                Batch::new(record)
                    .debit(pool, Bucket::Available, reward)
                    .credit(owner.clone(), Bucket::Staked, reward),
            )?;

            position.principal = position
                .principal
                .checked_add(reward)
                .ok_or(LedgerError::ArithmeticOverflow)?;
            position.accumulated_rewards = position.accumulated_rewards.saturating_add(reward);
            position.last_claim_time = now;
            txn.put_position(position);
            Ok((reward, self.next_due(now)?))
        })?;

        self.schedule.lock().schedule(id, due);
        info!(position = %id, %owner, amount = %reward, "Rewards compounded");
        Ok(reward)
    }

    /// Withdraw principal; settles pending reward first when the staking
    /// pool can cover it
    pub fn unstake(
        &self,
        owner: &AccountId,
        id: StakeId,
        partial: Option<Amount>,
    ) -> Result<UnstakeOutcome> {
        let (outcome, due) = self.store.transact(|txn| {
            txn.account(owner)
                .ok_or_else(|| LedgerError::AccountNotFound(owner.clone()))?;
            let mut position = owned_position(txn, owner, id)?;
            let now = txn.now();
            if position.is_locked(now) {
                return Err(LedgerError::PositionLocked {
                    position: id,
                    unlocks_at: position.unlocks_at().unwrap_or(DateTime::<Utc>::MAX_UTC),
                });
            }

            let amount = match partial {
                None => position.principal,
                Some(a) if a.is_zero() || a > position.principal => {
                    return Err(LedgerError::InvalidAmount(format!(
                        "partial unstake of {a} outside (0, {}]",
                        position.principal
                    )));
                }
                Some(a) => a,
            };

            // Short staking pool: principal still returns, reward stays pending
            let rewards_claimed = match self.settle(txn, &mut position) {
                Err(LedgerError::InsufficientFunds { .. }) => {
                    warn!(position = %id, %owner, "Staking pool short, reward left pending");
                    Amount::ZERO
                }
                other => other?,
            };

            let record = TransactionDraft::new(
                TxKind::Unstake,
                owner.clone(),
                owner.clone(),
                amount,
                format!("unstake {id}"),
            );
            txn.apply(
                Batch::new(record)
                    .debit(owner.clone(), Bucket::Staked, amount)
                    .credit(owner.clone(), Bucket::Available, amount),
            )?;

            position.principal = position.principal.saturating_sub(amount);
            let closed = position.principal.is_zero();
            if closed {
                position.status = tally_core::PositionStatus::Closed;
            }
            txn.put_position(position);

            let due = if closed { None } else { Some(self.next_due(now)?) };
            Ok((
                UnstakeOutcome {
                    returned: amount,
                    rewards_claimed,
                    closed,
                },
                due,
            ))
        })?;

        {
            let mut schedule = self.schedule.lock();
            match due {
                Some(due) => schedule.schedule(id, due),
                None => {
                    schedule.remove(id);
                }
            }
        }
        info!(
            position = %id,
            %owner,
            returned = %outcome.returned,
            rewards = %outcome.rewards_claimed,
            closed = outcome.closed,
            "Unstaked"
        );
        Ok(outcome)
    }

    /// All positions of an owner
    pub fn positions(&self, owner: &AccountId) -> Result<Vec<StakePosition>> {
        self.store.positions_of(owner)
    }

    /// Pay every due position, each in its own store transaction.
    ///
    /// Failures are logged and skipped. `cancel` is checked between
    /// positions; entries not yet visited stay scheduled.
    pub fn run_distribution(&self, cancel: &AtomicBool) -> SweepReport {
        let now = self.store.now();
        let mut report = SweepReport::default();

        loop {
            if cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }
            let Some(id) = self.schedule.lock().pop_due(now) else {
                break;
            };
            report.examined += 1;

            let result = self.store.transact(|txn| {
                let Some(mut position) = txn.position(id).cloned() else {
                    return Ok(SweepOutcome::Retired);
                };
                if !position.is_active() {
                    return Ok(SweepOutcome::Retired);
                }
                let reward = self.settle(txn, &mut position)?;
                Ok(if reward.is_zero() {
                    SweepOutcome::Empty
                } else {
                    SweepOutcome::Paid(reward)
                })
            });

            let reschedule = match result {
                Ok(SweepOutcome::Paid(reward)) => {
                    report.paid += 1;
                    report.distributed = report.distributed.saturating_add(reward);
                    true
                }
                Ok(SweepOutcome::Empty) => {
                    report.empty += 1;
                    true
                }
                Ok(SweepOutcome::Retired) => {
                    report.retired += 1;
                    false
                }
                Err(err) => {
                    warn!(position = %id, error = %err, "Skipping position in distribution sweep");
                    report.failed += 1;
                    true
                }
            };
            if reschedule {
                match self.next_due(now) {
                    Ok(due) => self.schedule.lock().schedule(id, due),
                    Err(err) => warn!(position = %id, error = %err, "Cannot reschedule position"),
                }
            }
        }

        info!(
            examined = report.examined,
            paid = report.paid,
            failed = report.failed,
            distributed = %report.distributed,
            cancelled = report.cancelled,
            "Distribution sweep finished"
        );
        report
    }

    /// Re-index active positions from the store, e.g. after a restore
    pub fn rebuild_schedule(&self) -> Result<()> {
        let entries: Vec<(StakeId, DateTime<Utc>)> = self.store.read(|state| {
            state
                .positions
                .values()
                .filter(|p| p.is_active())
                .map(|p| (p.id, p.last_claim_time))
                .collect()
        })?;
        let entries = entries
            .into_iter()
            .map(|(id, last_claim)| Ok((id, self.next_due(last_claim)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut schedule = self.schedule.lock();
        schedule.clear();
        for (id, due) in &entries {
            schedule.schedule(*id, *due);
        }
        debug!(positions = entries.len(), "Rebuilt distribution schedule");
        Ok(())
    }

    /// Number of positions awaiting a sweep
    pub fn scheduled(&self) -> usize {
        self.schedule.lock().len()
    }

    /// Pay a position's pending reward from the staking pool and advance its
    /// claim time. Zero rewards leave the position untouched.
    fn settle(&self, txn: &mut StoreTxn<'_>, position: &mut StakePosition) -> Result<Amount> {
        let now = txn.now();
        let reward = accrued_reward(position, self.pool(&position.pool)?.apy(), now)?;
        if reward.is_zero() {
            return Ok(Amount::ZERO);
        }

        system_transfer(
            txn,
            &SystemAccount::StakingPool.id(),
            &position.owner,
            reward,
            TxKind::Reward,
            &format!("staking reward {}", position.id),
        )?;
        position.last_claim_time = now;
        position.accumulated_rewards = position.accumulated_rewards.saturating_add(reward);
        txn.put_position(position.clone());
        Ok(reward)
    }
}

/// Active position owned by `owner`; anything else is not found
fn owned_position(txn: &StoreTxn<'_>, owner: &AccountId, id: StakeId) -> Result<StakePosition> {
    txn.position(id)
        .filter(|p| &p.owner == owner && p.is_active())
        .cloned()
        .ok_or(LedgerError::PositionNotFound(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{TokenPolicy, TransferEngine};
    use chrono::TimeZone;
    use tally_core::{ManualClock, PositionStatus};
    use tally_storage::{LedgerState, StoreConfig};

    struct Harness {
        store: Arc<LedgerStore>,
        clock: Arc<ManualClock>,
        transfers: TransferEngine,
        staking: StakingEngine,
    }

    fn harness() -> Harness {
        let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(LedgerStore::new(StoreConfig::default(), clock.clone()));
        let transfers = TransferEngine::new(store.clone(), TokenPolicy::default());
        transfers
            .allocate_genesis(&[(SystemAccount::StakingPool.id(), Amount::from_tokens(100_000))])
            .unwrap();
        let staking =
            StakingEngine::new(store.clone(), PoolConfig::defaults(), Duration::days(1)).unwrap();
        Harness {
            store,
            clock,
            transfers,
            staking,
        }
    }

    fn id(s: &str) -> AccountId {
        AccountId::from(s)
    }

    fn tokens(n: u64) -> Amount {
        Amount::from_tokens(n)
    }

    #[test]
    fn test_multiplier_grows_with_lock() {
        let basic = &PoolConfig::defaults()[0];
        assert_eq!(basic.multiplier_for(0), Rate::ONE);
        assert_eq!(basic.multiplier_for(365), Rate::from_ppm(1_100_000));
        assert!(basic.multiplier_for(30) > Rate::ONE);
    }

    #[test]
    fn test_one_year_flexible_reward() {
        let h = harness();
        h.transfers.mint(&id("b"), tokens(50), "seed").unwrap();
        let pos = h.staking.stake(&id("b"), "basic", tokens(50), Some(0)).unwrap();

        h.clock.advance(Duration::hours(365 * 24));
        assert_eq!(h.staking.pending_reward(pos).unwrap(), tokens(15));
    }

    #[test]
    fn test_stake_validation() {
        let h = harness();
        h.transfers.mint(&id("b"), tokens(500), "seed").unwrap();

        assert_eq!(
            h.staking.stake(&id("b"), "gold", tokens(50), None),
            Err(LedgerError::UnknownPool("gold".into()))
        );
        assert!(matches!(
            h.staking.stake(&id("b"), "basic", tokens(5), None),
            Err(LedgerError::BelowMinimumStake { .. })
        ));
        assert!(matches!(
            h.staking.stake(&id("b"), "basic", tokens(50), Some(366)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            h.staking.stake(&id("b"), "premium", tokens(100), None),
            Err(LedgerError::PoolIneligible { .. })
        ));
        assert!(matches!(
            h.staking.stake(&id("b"), "basic", tokens(501), None),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(
            h.staking.stake(&id("nobody"), "basic", tokens(50), None),
            Err(LedgerError::AccountNotFound(id("nobody")))
        );
        assert!(h.staking.positions(&id("b")).unwrap().is_empty());
    }

    #[test]
    fn test_capability_unlocks_pool() {
        let h = harness();
        h.transfers.mint(&id("p"), tokens(500), "seed").unwrap();
        h.store
            .transact(|txn| {
                txn.update_account(&id("p"), |a| {
                    a.capabilities.insert(Capability::Premium);
                })
            })
            .unwrap();
        let pos = h.staking.stake(&id("p"), "premium", tokens(100), None).unwrap();
        let position = &h.staking.positions(&id("p")).unwrap()[0];
        assert_eq!(position.id, pos);
        assert_eq!(position.lock_days, 30);
    }

    #[test]
    fn test_claim_pays_and_resets() {
        let h = harness();
        h.transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        let pos = h.staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();

        assert_eq!(
            h.staking.claim(&id("b"), ClaimTarget::All),
            Err(LedgerError::NothingToClaim)
        );

        h.clock.advance(Duration::days(73));
        let paid = h.staking.claim(&id("b"), ClaimTarget::One(pos)).unwrap();
        assert_eq!(paid, tokens(6));
        assert_eq!(h.staking.pending_reward(pos).unwrap(), Amount::ZERO);

        let account = h.store.get_account(&id("b")).unwrap();
        assert_eq!(account.available, tokens(6));
        assert_eq!(account.staked, tokens(100));
        assert_eq!(h.staking.positions(&id("b")).unwrap()[0].accumulated_rewards, tokens(6));
        assert!(h.store.read(LedgerState::is_conserved).unwrap());
    }

    #[test]
    fn test_claim_other_owner_is_not_found() {
        let h = harness();
        h.transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        h.transfers.mint(&id("c"), tokens(1), "seed").unwrap();
        let pos = h.staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();
        h.clock.advance(Duration::days(10));

        assert_eq!(
            h.staking.claim(&id("c"), ClaimTarget::One(pos)),
            Err(LedgerError::PositionNotFound(pos))
        );
        assert_eq!(
            h.staking.claim(&id("ghost"), ClaimTarget::One(pos)),
            Err(LedgerError::AccountNotFound(id("ghost")))
        );
    }

    #[test]
    fn test_compound_grows_principal() {
        let h = harness();
        h.transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        let pos = h.staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();
        h.clock.advance(Duration::days(73));

        let added = h.staking.compound(&id("b"), pos).unwrap();
        assert_eq!(added, tokens(6));

        let position = &h.staking.positions(&id("b")).unwrap()[0];
        assert_eq!(position.principal, tokens(106));
        assert_eq!(h.store.get_account(&id("b")).unwrap().staked, tokens(106));
        assert_eq!(h.staking.compound(&id("b"), pos), Err(LedgerError::NothingToClaim));
        assert!(h.store.read(LedgerState::is_conserved).unwrap());
    }

    #[test]
    fn test_lock_blocks_unstake_until_expiry() {
        let h = harness();
        h.transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        let pos = h.staking.stake(&id("b"), "basic", tokens(100), Some(30)).unwrap();

        h.clock.advance(Duration::days(10));
        assert!(matches!(
            h.staking.unstake(&id("b"), pos, None),
            Err(LedgerError::PositionLocked { .. })
        ));

        h.clock.advance(Duration::days(21));
        let outcome = h.staking.unstake(&id("b"), pos, None).unwrap();
        assert_eq!(outcome.returned, tokens(100));
        assert!(outcome.closed);
        assert!(outcome.rewards_claimed > Amount::ZERO);

        let position = &h.staking.positions(&id("b")).unwrap()[0];
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(h.staking.pending_reward(pos).unwrap(), Amount::ZERO);
        assert_eq!(h.staking.scheduled(), 0);
    }

    #[test]
    fn test_partial_unstake() {
        let h = harness();
        h.transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        let pos = h.staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();

        assert!(matches!(
            h.staking.unstake(&id("b"), pos, Some(Amount::ZERO)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            h.staking.unstake(&id("b"), pos, Some(tokens(101))),
            Err(LedgerError::InvalidAmount(_))
        ));

        let outcome = h.staking.unstake(&id("b"), pos, Some(tokens(40))).unwrap();
        assert!(!outcome.closed);
        assert_eq!(h.staking.positions(&id("b")).unwrap()[0].principal, tokens(60));
        let account = h.store.get_account(&id("b")).unwrap();
        assert_eq!(account.available, tokens(40));
        assert_eq!(account.staked, tokens(60));
    }

    #[test]
    fn test_empty_staking_pool_fails_claim_atomically() {
        let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(LedgerStore::new(StoreConfig::default(), clock.clone()));
        let transfers = TransferEngine::new(store.clone(), TokenPolicy::default());
        let staking = StakingEngine::new(store.clone(), PoolConfig::defaults(), Duration::days(1)).unwrap();
        transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        let pos = staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();
        clock.advance(Duration::days(30));

        let before = store.read(|s| s.clone()).unwrap();
        assert!(matches!(
            staking.claim(&id("b"), ClaimTarget::One(pos)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(store.read(|s| s.clone()).unwrap(), before);
    }

    #[test]
    fn test_unstake_with_empty_staking_pool_returns_principal() {
        let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(LedgerStore::new(StoreConfig::default(), clock.clone()));
        let transfers = TransferEngine::new(store.clone(), TokenPolicy::default());
        let staking = StakingEngine::new(store.clone(), PoolConfig::defaults(), Duration::days(1)).unwrap();
        transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        let pos = staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();
        clock.advance(Duration::days(30));
        let pending = staking.pending_reward(pos).unwrap();
        assert!(!pending.is_zero());

        let outcome = staking.unstake(&id("b"), pos, Some(tokens(40))).unwrap();
        assert_eq!(outcome.returned, tokens(40));
        assert_eq!(outcome.rewards_claimed, Amount::ZERO);
        assert!(!outcome.closed);

        let account = store.get_account(&id("b")).unwrap();
        assert_eq!(account.available, tokens(40));
        assert_eq!(account.staked, tokens(60));
        // Unpaid reward stays on the position
        let position = &staking.positions(&id("b")).unwrap()[0];
        assert_eq!(position.last_claim_time, position.start_time);
        let remaining = staking.pending_reward(pos).unwrap();
        assert!(!remaining.is_zero() && remaining < pending);
        assert!(store.read(LedgerState::is_conserved).unwrap());

        let outcome = staking.unstake(&id("b"), pos, None).unwrap();
        assert!(outcome.closed);
        assert_eq!(store.get_account(&id("b")).unwrap().available, tokens(100));
    }

    #[test]
    fn test_whale_pool_requires_minimum_balance() {
        let h = harness();
        h.transfers.mint(&id("w"), tokens(20_000), "seed").unwrap();
        assert_eq!(
            h.staking.stake(&id("w"), "whale", tokens(10_000), None),
            Err(LedgerError::PoolIneligible {
                pool: "whale".into(),
                account: id("w"),
            })
        );

        h.transfers.mint(&id("w"), tokens(30_000), "seed").unwrap();
        let first = h.staking.stake(&id("w"), "whale", tokens(10_000), None).unwrap();
        assert_eq!(h.staking.positions(&id("w")).unwrap()[0].lock_days, 90);

        // 40,000 available plus 10,000 staked still meets the threshold
        let second = h.staking.stake(&id("w"), "whale", tokens(10_000), None).unwrap();
        assert_ne!(first, second);

        h.transfers.mint(&id("s"), tokens(49_999), "seed").unwrap();
        assert!(matches!(
            h.staking.stake(&id("s"), "whale", tokens(10_000), None),
            Err(LedgerError::PoolIneligible { .. })
        ));
    }

    #[test]
    fn test_lock_beyond_calendar_is_rejected() {
        let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(LedgerStore::new(StoreConfig::default(), clock.clone()));
        let transfers = TransferEngine::new(store.clone(), TokenPolicy::default());
        let pool = PoolConfig {
            max_lock_days: u32::MAX,
            ..PoolConfig::defaults().remove(0)
        };
        let staking = StakingEngine::new(store.clone(), vec![pool], Duration::days(1)).unwrap();
        transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        let before = store.read(|s| s.clone()).unwrap();

        assert_eq!(
            staking.stake(&id("b"), "basic", tokens(50), Some(u32::MAX)),
            Err(LedgerError::ArithmeticOverflow)
        );
        assert_eq!(store.read(|s| s.clone()).unwrap(), before);
        assert_eq!(staking.scheduled(), 0);
    }

    #[test]
    fn test_oversized_interval_is_capped() {
        let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(LedgerStore::new(StoreConfig::default(), clock.clone()));
        let transfers = TransferEngine::new(store.clone(), TokenPolicy::default());
        transfers
            .allocate_genesis(&[(SystemAccount::StakingPool.id(), tokens(1_000))])
            .unwrap();
        let staking =
            StakingEngine::new(store.clone(), PoolConfig::defaults(), Duration::days(1_000_000_000))
                .unwrap();
        transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        let pos = staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();

        clock.advance(Duration::days(30));
        assert!(!staking.claim(&id("b"), ClaimTarget::One(pos)).unwrap().is_zero());
        clock.advance(Duration::days(1));
        assert!(!staking.compound(&id("b"), pos).unwrap().is_zero());
        assert_eq!(staking.scheduled(), 1);
    }

    #[test]
    fn test_sweep_pays_only_due_positions() {
        let h = harness();
        h.transfers.mint(&id("b"), tokens(1000), "seed").unwrap();
        let early = h.staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();
        h.clock.advance(Duration::hours(12));
        let late = h.staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();
        h.clock.advance(Duration::hours(13));

        let report = h.staking.run_distribution(&AtomicBool::new(false));
        assert_eq!(report.examined, 1);
        assert_eq!(report.paid, 1);
        assert!(report.distributed > Amount::ZERO);
        assert_eq!(h.staking.pending_reward(early).unwrap(), Amount::ZERO);
        assert!(h.staking.pending_reward(late).unwrap() > Amount::ZERO);
        assert_eq!(h.staking.scheduled(), 2);
    }

    #[test]
    fn test_sweep_skips_failures_and_honours_cancel() {
        let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(LedgerStore::new(StoreConfig::default(), clock.clone()));
        let transfers = TransferEngine::new(store.clone(), TokenPolicy::default());
        let staking = StakingEngine::new(store.clone(), PoolConfig::defaults(), Duration::days(1)).unwrap();
        transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        staking.stake(&id("b"), "basic", tokens(50), Some(0)).unwrap();
        staking.stake(&id("b"), "basic", tokens(50), Some(0)).unwrap();
        clock.advance(Duration::days(2));

        // Nothing in the staking pool: both settle attempts fail and are skipped
        let report = staking.run_distribution(&AtomicBool::new(false));
        assert_eq!(report.examined, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(staking.scheduled(), 2);

        clock.advance(Duration::days(2));
        let report = staking.run_distribution(&AtomicBool::new(true));
        assert!(report.cancelled);
        assert_eq!(report.examined, 0);
        assert_eq!(staking.scheduled(), 2);
    }

    #[test]
    fn test_rebuild_schedule_from_store() {
        let h = harness();
        h.transfers.mint(&id("b"), tokens(100), "seed").unwrap();
        h.staking.stake(&id("b"), "basic", tokens(100), Some(0)).unwrap();

        let fresh = StakingEngine::new(h.store.clone(), PoolConfig::defaults(), Duration::days(1)).unwrap();
        assert_eq!(fresh.scheduled(), 1);
    }

    #[test]
    fn test_eligibility_from_toml() {
        let pool: PoolConfig = toml::from_str(
            r#"
            name = "vip"
            apy_bps = 4000
            minimum_stake = "25.5"
            eligibility = { kind = "minimum_balance", amount = "1000" }
            "#,
        )
        .unwrap();
        assert_eq!(pool.minimum_stake, "25.5".parse().unwrap());
        assert_eq!(pool.multiplier_bonus_bps, 10_000);
        assert_eq!(
            pool.eligibility,
            Eligibility::MinimumBalance {
                amount: tokens(1000)
            }
        );
    }
}
