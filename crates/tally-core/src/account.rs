//! Accounts, capabilities and system roles

use crate::amount::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Prefix shared by all system role ids.
pub const SYSTEM_PREFIX: &str = "system:";

/// Unique account identifier
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id. Surrounding whitespace is trimmed.
    pub fn new(id: impl Into<String>) -> Self {
        let id: String = id.into();
        Self(id.trim().to_string())
    }

    /// Borrow as str
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty id (never a valid account)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if this id names a system role
    pub fn is_system(&self) -> bool {
        self.0.starts_with(SYSTEM_PREFIX)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<SystemAccount> for AccountId {
    fn from(role: SystemAccount) -> Self {
        role.id()
    }
}

/// Accounts owned by the economy itself rather than a user
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemAccount {
    /// Collects transfer fees
    Treasury,
    /// Funds welcome credits and referral bonuses
    RewardsPool,
    /// Reserve that pays staking rewards
    StakingPool,
    /// Collects marketplace and tip fees
    MarketplaceFees,
    /// Counterparty recorded on burns; never holds balance
    BurnSink,
    /// Development fund
    DevelopmentFund,
}

impl SystemAccount {
    /// Every system role
    pub const ALL: [SystemAccount; 6] = [
        Self::Treasury,
        Self::RewardsPool,
        Self::StakingPool,
        Self::MarketplaceFees,
        Self::BurnSink,
        Self::DevelopmentFund,
    ];

    /// Role name without prefix
    pub fn name(&self) -> &'static str {
        match self {
            Self::Treasury => "treasury",
            Self::RewardsPool => "rewards_pool",
            Self::StakingPool => "staking_pool",
            Self::MarketplaceFees => "marketplace_fees",
            Self::BurnSink => "burn_sink",
            Self::DevelopmentFund => "development_fund",
        }
    }

    /// Ledger account id for this role
    pub fn id(&self) -> AccountId {
        AccountId(format!("{SYSTEM_PREFIX}{}", self.name()))
    }

    /// Resolve a role from its account id
    pub fn from_id(id: &AccountId) -> Option<Self> {
        let name = id.as_str().strip_prefix(SYSTEM_PREFIX)?;
        Self::ALL.into_iter().find(|role| role.name() == name)
    }
}

/// Entitlements that gate pools and features
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Paid premium membership
    Premium,
    /// Can sell content and receive tips
    Creator,
    /// Identity verified
    Verified,
}

impl Capability {
    /// Parse a capability name
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "premium" => Some(Self::Premium),
            "creator" => Some(Self::Creator),
            "verified" => Some(Self::Verified),
            _ => None,
        }
    }
}

/// Balance bucket within an account
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Freely spendable
    Available,
    /// Committed to stake positions
    Staked,
    /// Held and not spendable
    Locked,
}

/// A named balance holder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id
    pub id: AccountId,

    /// Spendable balance
    pub available: Amount,

    /// Principal committed to stake positions
    pub staked: Amount,

    /// Held balance
    pub locked: Amount,

    /// Lifetime inflow (analytics only)
    pub total_earned: Amount,

    /// Lifetime outflow (analytics only)
    pub total_spent: Amount,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last committed transaction touching this account
    pub last_activity: DateTime<Utc>,

    /// Referral bonuses received
    pub referral_count: u64,

    /// Granted capabilities
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,

    /// Account-level hold; when engaged no transaction may touch the account
    #[serde(default)]
    pub hold: bool,
}

impl Account {
    /// Create an empty account
    pub fn new(id: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            available: Amount::ZERO,
            staked: Amount::ZERO,
            locked: Amount::ZERO,
            total_earned: Amount::ZERO,
            total_spent: Amount::ZERO,
            created_at: now,
            last_activity: now,
            referral_count: 0,
            capabilities: BTreeSet::new(),
            hold: false,
        }
    }

    /// `available + staked + locked`, `None` on overflow
    pub fn checked_total(&self) -> Option<Amount> {
        self.available
            .checked_add(self.staked)
            .and_then(|sum| sum.checked_add(self.locked))
    }

    /// `available + staked + locked`
    pub fn total(&self) -> Amount {
        self.available.saturating_add(self.staked).saturating_add(self.locked)
    }

    /// Balance of one bucket
    pub fn bucket(&self, bucket: Bucket) -> Amount {
        match bucket {
            Bucket::Available => self.available,
            Bucket::Staked => self.staked,
            Bucket::Locked => self.locked,
        }
    }

    /// Mutable balance of one bucket
    pub fn bucket_mut(&mut self, bucket: Bucket) -> &mut Amount {
        match bucket {
            Bucket::Available => &mut self.available,
            Bucket::Staked => &mut self.staked,
            Bucket::Locked => &mut self.locked,
        }
    }

    /// Check a capability
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Premium membership
    pub fn is_premium(&self) -> bool {
        self.has(Capability::Premium)
    }

    /// True for system role accounts
    pub fn is_system(&self) -> bool {
        self.id.is_system()
    }
}
