//! Ledger service
//!
//! `LedgerService` owns the store and the three engines. It is built once at
//! start-up and shared by `Arc`; the runtime, the CLI and the tests all talk
//! to the ledger through it.

use crate::config::NodeConfig;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tally_core::{
    Account, AccountId, Amount, Capability, Clock, LedgerError, Result, StakeId,
    StakePosition, Transaction, TransactionId, TxKind,
};
use tally_economics::{
    ClaimTarget, Marketplace, Receipt, StakingEngine, SweepReport, TransferEngine, UnstakeOutcome,
};
use tally_storage::{LedgerSnapshot, LedgerStats, LedgerStore, SnapshotResult};
use tracing::info;

/// How a ledger was brought up by [`LedgerService::open`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Restored from an existing snapshot file
    Restored { sequence: u64 },
    /// Fresh ledger with genesis allocations minted
    Genesis { allocations: usize },
}

/// The ledger and every operation on it
pub struct LedgerService {
    store: Arc<LedgerStore>,
    transfers: TransferEngine,
    staking: StakingEngine,
    marketplace: Marketplace,
}

impl LedgerService {
    /// Empty ledger configured from `config`
    pub fn new(config: &NodeConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Arc::new(LedgerStore::new(config.store_config(), clock));
        Self::with_store(config, store)
    }

    /// Wrap an existing store
    pub fn with_store(config: &NodeConfig, store: Arc<LedgerStore>) -> Result<Self> {
        Ok(Self {
            transfers: TransferEngine::new(store.clone(), config.token.clone()),
            staking: StakingEngine::new(
                store.clone(),
                config.staking.pools.clone(),
                config.staking.distribution_interval(),
            )?,
            marketplace: Marketplace::new(store.clone(), config.marketplace.clone()),
            store,
        })
    }

    /// Restore from the configured snapshot file, or mint genesis when there
    /// is none yet. A snapshot that fails validation is an error.
    pub fn open(config: &NodeConfig, clock: Arc<dyn Clock>) -> SnapshotResult<(Self, Origin)> {
        let service = Self::new(config, clock)?;
        let path = config.snapshot_path();

        if path.exists() {
            service.load(&path)?;
            let sequence = service.stats()?.sequence;
            info!(path = %path.display(), sequence, "Ledger restored from snapshot");
            return Ok((service, Origin::Restored { sequence }));
        }

        let allocations = service.allocate_genesis(&config.genesis.entries())?.len();
        info!(allocations, "Fresh ledger initialised from genesis");
        Ok((service, Origin::Genesis { allocations }))
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    pub fn staking(&self) -> &StakingEngine {
        &self.staking
    }

    pub fn marketplace(&self) -> &Marketplace {
        &self.marketplace
    }

    // ---- Balances and transfers ----

    /// Account snapshot; unknown users are opened on first touch
    pub fn get_balance(&self, id: &AccountId) -> Result<Account> {
        self.store.get_account(id)
    }

    pub fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
        note: &str,
    ) -> Result<TransactionId> {
        self.transfers.transfer(from, to, amount, note)
    }

    pub fn mint(&self, to: &AccountId, amount: Amount, reason: &str) -> Result<TransactionId> {
        self.transfers.mint(to, amount, reason)
    }

    pub fn burn(&self, from: &AccountId, amount: Amount, reason: &str) -> Result<TransactionId> {
        self.transfers.burn(from, amount, reason)
    }

    /// Fee-free movement between accounts, e.g. a pool paying out
    pub fn system_transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
        kind: TxKind,
        note: &str,
    ) -> Result<TransactionId> {
        self.transfers.system_transfer(from, to, amount, kind, note)
    }

    pub fn allocate_genesis(&self, allocations: &[(AccountId, Amount)]) -> Result<Vec<TransactionId>> {
        self.transfers.allocate_genesis(allocations)
    }

    // ---- Staking ----

    pub fn stake(
        &self,
        owner: &AccountId,
        pool: &str,
        amount: Amount,
        lock_days: Option<u32>,
    ) -> Result<StakeId> {
        self.staking.stake(owner, pool, amount, lock_days)
    }

    pub fn pending_reward(&self, position: StakeId) -> Result<Amount> {
        self.staking.pending_reward(position)
    }

    pub fn pending_for(&self, owner: &AccountId) -> Result<Amount> {
        self.staking.pending_for(owner)
    }

    /// Pending reward of one position, which must belong to `owner`
    pub fn pending_reward_of(&self, owner: &AccountId, position: StakeId) -> Result<Amount> {
        if !self.positions(owner)?.iter().any(|p| p.id == position) {
            return Err(LedgerError::PositionNotFound(position));
        }
        self.pending_reward(position)
    }

    /// Claim one position, or every active position when `position` is `None`
    pub fn claim(&self, owner: &AccountId, position: Option<StakeId>) -> Result<Amount> {
        let target = position.map_or(ClaimTarget::All, ClaimTarget::One);
        self.staking.claim(owner, target)
    }

    pub fn compound(&self, owner: &AccountId, position: StakeId) -> Result<Amount> {
        self.staking.compound(owner, position)
    }

    pub fn unstake(
        &self,
        owner: &AccountId,
        position: StakeId,
        partial: Option<Amount>,
    ) -> Result<UnstakeOutcome> {
        self.staking.unstake(owner, position, partial)
    }

    pub fn positions(&self, owner: &AccountId) -> Result<Vec<StakePosition>> {
        self.staking.positions(owner)
    }

    /// One distribution sweep over every due position
    pub fn run_distribution(&self, cancel: &AtomicBool) -> SweepReport {
        self.staking.run_distribution(cancel)
    }

    // ---- Marketplace ----

    pub fn purchase(
        &self,
        buyer: &AccountId,
        creator: &AccountId,
        price: Amount,
        content_ref: &str,
    ) -> Result<Receipt> {
        self.marketplace.purchase(buyer, creator, price, content_ref)
    }

    pub fn tip(
        &self,
        tipper: &AccountId,
        creator: &AccountId,
        amount: Amount,
        message: &str,
    ) -> Result<Receipt> {
        self.marketplace.tip(tipper, creator, amount, message)
    }

    pub fn referral_bonus(
        &self,
        referrer: &AccountId,
        referred: &AccountId,
        purchase_amount: Amount,
    ) -> Result<Amount> {
        self.marketplace.referral_bonus(referrer, referred, purchase_amount)
    }

    // ---- Queries and administration ----

    /// Most recent transactions touching `id`, newest first
    pub fn history(&self, id: &AccountId, limit: usize) -> Result<Vec<Transaction>> {
        self.store.history(id, limit)
    }

    /// Log tail after `sequence`, oldest first
    pub fn transactions_since(&self, sequence: u64) -> Result<Vec<Transaction>> {
        self.store.transactions_since(sequence)
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        self.store.stats()
    }

    pub fn grant_capability(&self, id: &AccountId, capability: Capability) -> Result<()> {
        self.edit_capabilities(id, |caps| {
            caps.insert(capability);
        })?;
        info!(account = %id, ?capability, "Capability granted");
        Ok(())
    }

    pub fn revoke_capability(&self, id: &AccountId, capability: Capability) -> Result<()> {
        self.edit_capabilities(id, |caps| {
            caps.remove(&capability);
        })?;
        info!(account = %id, ?capability, "Capability revoked");
        Ok(())
    }

    /// Freeze or release an account
    pub fn set_hold(&self, id: &AccountId, hold: bool) -> Result<()> {
        self.store.set_hold(id, hold)
    }

    fn edit_capabilities(
        &self,
        id: &AccountId,
        edit: impl FnOnce(&mut std::collections::BTreeSet<Capability>),
    ) -> Result<()> {
        self.store.transact(|txn| {
            txn.open_account(id)?;
            txn.update_account(id, |account| edit(&mut account.capabilities))
        })
    }

    // ---- Persistence ----

    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        self.store.snapshot()
    }

    /// Encoded snapshot bytes
    pub fn snapshot_bytes(&self) -> SnapshotResult<Vec<u8>> {
        self.snapshot()?.encode()
    }

    /// Replace the ledger with a validated snapshot and re-index staking
    pub fn restore(&self, snapshot: LedgerSnapshot) -> SnapshotResult<()> {
        self.store.restore(snapshot)?;
        self.staking.rebuild_schedule()?;
        Ok(())
    }

    pub fn restore_bytes(&self, bytes: &[u8]) -> SnapshotResult<()> {
        self.restore(LedgerSnapshot::decode(bytes)?)
    }

    /// Write an atomic snapshot file
    pub fn save(&self, path: &Path) -> SnapshotResult<()> {
        self.snapshot()?.write_to(path)
    }

    pub fn load(&self, path: &Path) -> SnapshotResult<()> {
        self.restore(LedgerSnapshot::read_from(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tally_core::{ManualClock, SystemAccount};

    fn clock() -> Arc<ManualClock> {
        ManualClock::shared(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }

    fn service() -> LedgerService {
        let mut config = NodeConfig::default();
        config.ledger.welcome_bonus = Amount::ZERO;
        let service = LedgerService::new(&config, clock()).unwrap();
        service.allocate_genesis(&config.genesis.entries()).unwrap();
        service
    }

    #[test]
    fn test_claim_without_positions() {
        let service = service();
        let alice = AccountId::from("alice");
        service.get_balance(&alice).unwrap();
        assert_eq!(service.claim(&alice, None), Err(LedgerError::NothingToClaim));
    }

    #[test]
    fn test_capabilities_gate_premium_pool() {
        let service = service();
        let alice = AccountId::from("alice");
        service
            .system_transfer(
                &SystemAccount::RewardsPool.id(),
                &alice,
                Amount::from_tokens(500),
                TxKind::ReferralBonus,
                "test",
            )
            .unwrap();

        assert!(matches!(
            service.stake(&alice, "premium", Amount::from_tokens(200), None),
            Err(LedgerError::PoolIneligible { .. })
        ));
        service.grant_capability(&alice, Capability::Premium).unwrap();
        service
            .stake(&alice, "premium", Amount::from_tokens(200), None)
            .unwrap();

        service.revoke_capability(&alice, Capability::Premium).unwrap();
        assert!(!service.get_balance(&alice).unwrap().is_premium());
    }

    #[test]
    fn test_pending_reward_checks_owner() {
        let service = service();
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        service.mint(&alice, Amount::from_tokens(100), "seed").unwrap();
        service.get_balance(&bob).unwrap();
        let id = service.stake(&alice, "basic", Amount::from_tokens(100), None).unwrap();

        assert_eq!(service.pending_reward_of(&alice, id), Ok(Amount::ZERO));
        assert_eq!(
            service.pending_reward_of(&bob, id),
            Err(LedgerError::PositionNotFound(id))
        );
    }

    #[test]
    fn test_oversized_interval_does_not_panic() {
        let mut config = NodeConfig::default();
        config.staking.distribution_interval_secs = u64::MAX;
        let service = LedgerService::new(&config, clock()).unwrap();
        service.allocate_genesis(&config.genesis.entries()).unwrap();

        let alice = AccountId::from("alice");
        service.mint(&alice, Amount::from_tokens(100), "seed").unwrap();
        service.stake(&alice, "basic", Amount::from_tokens(100), None).unwrap();
        assert_eq!(service.staking().scheduled(), 1);
    }

    #[test]
    fn test_snapshot_bytes_restore_into_second_service() {
        let source = service();
        let alice = AccountId::from("alice");
        source.mint(&alice, Amount::from_tokens(40), "seed").unwrap();
        let bytes = source.snapshot_bytes().unwrap();

        let target = LedgerService::new(&NodeConfig::default(), clock()).unwrap();
        target.restore_bytes(&bytes).unwrap();
        assert_eq!(target.stats().unwrap(), source.stats().unwrap());
        assert_eq!(
            target.get_balance(&alice).unwrap().available,
            Amount::from_tokens(40)
        );
    }
}
