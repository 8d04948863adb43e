//! # Marketplace Settlement
//!
//! Content purchases, tips and referral bonuses.
//!
//! ```text
//!   purchase(price)            tip(amount)
//!        │                          │
//!   ┌────┴─────┐               ┌────┴─────┐
//!   ▼          ▼               ▼          ▼
//! creator   platform fee     creator   platform fee
//! share     = price - share  rest      = amount × tip fee
//! ```
//!
//! Every split is `part = whole × rate`, `rest = whole - part`, so the two
//! legs always add back up to the amount the buyer paid.

use crate::transfer::system_transfer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_core::{
    AccountId, Amount, Bucket, LedgerError, Rate, Result, SystemAccount, TransactionDraft,
    TransactionId, TxKind,
};
use tally_storage::{Batch, LedgerStore};
use tracing::info;

/// Revenue split parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplacePolicy {
    /// Creator's share of a purchase in basis points
    #[serde(default = "default_creator_share_bps")]
    pub creator_share_bps: u32,

    /// Platform fee on tips in basis points
    #[serde(default = "default_tip_fee_bps")]
    pub tip_fee_bps: u32,

    #[serde(default = "default_minimum_tip")]
    pub minimum_tip: Amount,

    /// Referral bonus as basis points of the referred purchase
    #[serde(default = "default_referral_bps")]
    pub referral_bps: u32,

    #[serde(default = "default_referral_min")]
    pub referral_min: Amount,

    #[serde(default = "default_referral_max")]
    pub referral_max: Amount,
}

fn default_creator_share_bps() -> u32 {
    8500
}
fn default_tip_fee_bps() -> u32 {
    500
}
fn default_minimum_tip() -> Amount {
    Amount::ONE
}
fn default_referral_bps() -> u32 {
    500
}
fn default_referral_min() -> Amount {
    Amount::ONE
}
fn default_referral_max() -> Amount {
    Amount::from_tokens(100)
}

impl Default for MarketplacePolicy {
    fn default() -> Self {
        Self {
            creator_share_bps: default_creator_share_bps(),
            tip_fee_bps: default_tip_fee_bps(),
            minimum_tip: default_minimum_tip(),
            referral_bps: default_referral_bps(),
            referral_min: default_referral_min(),
            referral_max: default_referral_max(),
        }
    }
}

/// Split `whole` into `(whole × share, remainder)`
pub fn split(whole: Amount, share: Rate) -> Result<(Amount, Amount)> {
    let part = whole
        .checked_mul_rate(share)
        .ok_or(LedgerError::ArithmeticOverflow)?;
    let rest = whole
        .checked_sub(part)
        .ok_or(LedgerError::ArithmeticOverflow)?;
    Ok((part, rest))
}

/// Settlement record for a purchase or tip
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction: TransactionId,
    /// What the payer was charged
    pub gross: Amount,
    /// Credited to the creator
    pub creator_amount: Amount,
    /// Credited to the marketplace fee account
    pub platform_fee: Amount,
    /// Content reference or tip message
    pub memo: String,
}

/// Purchase, tip and referral settlement
pub struct Marketplace {
    store: Arc<LedgerStore>,
    policy: MarketplacePolicy,
}

impl Marketplace {
    pub fn new(store: Arc<LedgerStore>, policy: MarketplacePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &MarketplacePolicy {
        &self.policy
    }

    /// Buy content from a creator
    pub fn purchase(
        &self,
        buyer: &AccountId,
        creator: &AccountId,
        price: Amount,
        content_ref: &str,
    ) -> Result<Receipt> {
        if price.is_zero() {
            return Err(LedgerError::InvalidListing("price must be positive".into()));
        }
        if buyer == creator {
            return Err(LedgerError::InvalidAmount("cannot purchase your own content".into()));
        }

        let (creator_amount, platform_fee) =
            split(price, Rate::from_bps(self.policy.creator_share_bps))?;
        let receipt = self.settle(
            TxKind::Purchase,
            buyer,
            creator,
            price,
            creator_amount,
            platform_fee,
            content_ref,
        )?;

        info!(
            tx = %receipt.transaction,
            %buyer,
            %creator,
            %price,
            fee = %platform_fee,
            content = content_ref,
            "Purchase settled"
        );
        Ok(receipt)
    }

    /// Tip a creator
    pub fn tip(
        &self,
        tipper: &AccountId,
        creator: &AccountId,
        amount: Amount,
        message: &str,
    ) -> Result<Receipt> {
        if tipper == creator {
            return Err(LedgerError::SelfTipNotAllowed);
        }
        if amount.is_zero() || amount < self.policy.minimum_tip {
            return Err(LedgerError::BelowMinimumTip {
                minimum: self.policy.minimum_tip,
                amount,
            });
        }

        let (platform_fee, creator_amount) = split(amount, Rate::from_bps(self.policy.tip_fee_bps))?;
        let receipt = self.settle(
            TxKind::Tip,
            tipper,
            creator,
            amount,
            creator_amount,
            platform_fee,
            message,
        )?;

        info!(tx = %receipt.transaction, %tipper, %creator, %amount, "Tip settled");
        Ok(receipt)
    }

    /// Pay the referrer a bonus for a referred purchase, funded by the
    /// rewards pool
    pub fn referral_bonus(
        &self,
        referrer: &AccountId,
        referred: &AccountId,
        purchase_amount: Amount,
    ) -> Result<Amount> {
        if purchase_amount.is_zero() {
            return Err(LedgerError::InvalidAmount("purchase amount must be positive".into()));
        }
        if referrer == referred {
            return Err(LedgerError::InvalidAmount("cannot refer yourself".into()));
        }
        let bonus = self.referral_amount(purchase_amount)?;

        self.store.transact(|txn| {
            system_transfer(
                txn,
                &SystemAccount::RewardsPool.id(),
                referrer,
                bonus,
                TxKind::ReferralBonus,
                &format!("referral: {referred}"),
            )?;
            txn.update_account(referrer, |account| account.referral_count += 1)
        })?;

        info!(%referrer, %referred, %bonus, "Referral bonus paid");
        Ok(bonus)
    }

    /// `clamp(purchase × rate, min, max)`
    pub fn referral_amount(&self, purchase_amount: Amount) -> Result<Amount> {
        let raw = purchase_amount
            .checked_mul_rate(Rate::from_bps(self.policy.referral_bps))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(raw
            .max(self.policy.referral_min)
            .min(self.policy.referral_max.max(self.policy.referral_min)))
    }

    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        kind: TxKind,
        payer: &AccountId,
        creator: &AccountId,
        gross: Amount,
        creator_amount: Amount,
        platform_fee: Amount,
        memo: &str,
    ) -> Result<Receipt> {
        let transaction = self.store.transact(|txn| {
            let record = TransactionDraft::new(kind, payer.clone(), creator.clone(), creator_amount, memo)
                .with_fee(platform_fee);
            let mut batch = Batch::new(record)
                .debit(payer.clone(), Bucket::Available, gross)
                .credit(creator.clone(), Bucket::Available, creator_amount);
            if !platform_fee.is_zero() {
                batch = batch.credit(SystemAccount::MarketplaceFees, Bucket::Available, platform_fee);
            }
            txn.apply(batch)
        })?;

        Ok(Receipt {
            transaction,
            gross,
            creator_amount,
            platform_fee,
            memo: memo.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{TokenPolicy, TransferEngine};
    use proptest::prelude::*;
    use tally_core::ManualClock;
    use tally_storage::{LedgerState, StoreConfig};

    fn setup() -> (Marketplace, TransferEngine, Arc<LedgerStore>) {
        let clock = ManualClock::shared(chrono::Utc::now());
        let store = Arc::new(LedgerStore::new(StoreConfig::default(), clock));
        (
            Marketplace::new(store.clone(), MarketplacePolicy::default()),
            TransferEngine::new(store.clone(), TokenPolicy::default()),
            store,
        )
    }

    fn id(s: &str) -> AccountId {
        AccountId::from(s)
    }

    fn tokens(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn test_purchase_split() {
        let (market, transfers, store) = setup();
        transfers.mint(&id("buyer"), tokens("100"), "seed").unwrap();

        let receipt = market
            .purchase(&id("buyer"), &id("artist"), tokens("20"), "song-42")
            .unwrap();
        assert_eq!(receipt.creator_amount, tokens("17"));
        assert_eq!(receipt.platform_fee, tokens("3"));

        assert_eq!(store.get_account(&id("buyer")).unwrap().available, tokens("80"));
        assert_eq!(store.get_account(&id("artist")).unwrap().available, tokens("17"));
        assert_eq!(
            store.get_account(&SystemAccount::MarketplaceFees.id()).unwrap().available,
            tokens("3")
        );
        assert!(store.read(LedgerState::is_conserved).unwrap());
    }

    #[test]
    fn test_purchase_validation() {
        let (market, transfers, store) = setup();
        transfers.mint(&id("buyer"), tokens("5"), "seed").unwrap();

        assert!(matches!(
            market.purchase(&id("buyer"), &id("artist"), Amount::ZERO, "x"),
            Err(LedgerError::InvalidListing(_))
        ));
        assert!(matches!(
            market.purchase(&id("buyer"), &id("buyer"), tokens("1"), "x"),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            market.purchase(&id("buyer"), &id("artist"), tokens("6"), "x"),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(store.account(&id("artist")).unwrap().is_none());
    }

    #[test]
    fn test_tip_rules() {
        let (market, transfers, _) = setup();
        transfers.mint(&id("fan"), tokens("10"), "seed").unwrap();

        assert_eq!(
            market.tip(&id("fan"), &id("fan"), tokens("5"), "hi"),
            Err(LedgerError::SelfTipNotAllowed)
        );
        assert!(matches!(
            market.tip(&id("fan"), &id("artist"), tokens("0.5"), "hi"),
            Err(LedgerError::BelowMinimumTip { .. })
        ));

        let receipt = market.tip(&id("fan"), &id("artist"), tokens("10"), "great show").unwrap();
        assert_eq!(receipt.platform_fee, tokens("0.5"));
        assert_eq!(receipt.creator_amount, tokens("9.5"));
        assert_eq!(receipt.memo, "great show");
    }

    #[test]
    fn test_referral_clamped_and_counted() {
        let (market, transfers, store) = setup();
        transfers
            .mint(&SystemAccount::RewardsPool.id(), tokens("1000"), "fund")
            .unwrap();

        // 5% of 10 = 0.5, raised to the 1 token floor
        assert_eq!(market.referral_bonus(&id("r"), &id("n"), tokens("10")).unwrap(), tokens("1"));
        // 5% of 100 = 5
        assert_eq!(market.referral_bonus(&id("r"), &id("n"), tokens("100")).unwrap(), tokens("5"));
        // 5% of 10_000 = 500, capped at 100
        assert_eq!(
            market.referral_bonus(&id("r"), &id("n"), tokens("10000")).unwrap(),
            tokens("100")
        );

        let referrer = store.get_account(&id("r")).unwrap();
        assert_eq!(referrer.referral_count, 3);
        assert_eq!(referrer.available, tokens("106"));

        assert!(matches!(
            market.referral_bonus(&id("r"), &id("r"), tokens("10")),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            market.referral_bonus(&id("r"), &id("n"), Amount::ZERO),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_referral_with_empty_pool_changes_nothing() {
        let (market, _, store) = setup();
        assert!(matches!(
            market.referral_bonus(&id("r"), &id("n"), tokens("10")),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(store.account(&id("r")).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_split_sums_to_whole(raw in any::<u64>(), bps in 0u32..=10_000) {
            let whole = Amount::from_raw(u128::from(raw));
            let (part, rest) = split(whole, Rate::from_bps(bps)).unwrap();
            prop_assert_eq!(part.checked_add(rest), Some(whole));
        }
    }
}
