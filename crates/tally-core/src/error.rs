//! Error types for Tally ledger operations
//!
//! Every variant is a recoverable, caller-visible outcome. An operation that
//! returns an error has left the ledger exactly as it found it.

use crate::account::AccountId;
use crate::amount::Amount;
use crate::stake::StakeId;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Validation ===
    /// Non-positive or self-referential amount/request
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Marketplace listing is not sellable
    #[error("Invalid listing: {0}")]
    InvalidListing(String),

    // === Balances ===
    /// A debit would take a bucket below zero
    #[error("Insufficient funds in {account}: need {required}, have {available}")]
    InsufficientFunds {
        account: AccountId,
        required: Amount,
        available: Amount,
    },

    /// Account must already exist for this operation
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account-level hold is engaged
    #[error("Account is frozen: {0}")]
    AccountFrozen(AccountId),

    // === Supply ===
    /// Mint would push total supply past the cap
    #[error("Supply cap exceeded: requested {requested}, remaining {remaining}")]
    SupplyCapExceeded { requested: Amount, remaining: Amount },

    /// Mint would exceed today's mint allowance
    #[error("Daily mint limit exceeded: requested {requested}, remaining today {remaining}")]
    DailyMintLimitExceeded { requested: Amount, remaining: Amount },

    // === Staking ===
    /// Position is inside its lock period
    #[error("Position {position} is locked until {unlocks_at}")]
    PositionLocked {
        position: StakeId,
        unlocks_at: DateTime<Utc>,
    },

    /// No such position for this owner
    #[error("Position not found: {0}")]
    PositionNotFound(StakeId),

    /// Pool name not configured
    #[error("Unknown staking pool: {0}")]
    UnknownPool(String),

    /// Account fails the pool's eligibility predicate
    #[error("Account {account} is not eligible for pool {pool}")]
    PoolIneligible { pool: String, account: AccountId },

    /// Stake below the pool minimum
    #[error("Stake of {amount} is below pool minimum {minimum}")]
    BelowMinimumStake { minimum: Amount, amount: Amount },

    /// Nothing has accrued
    #[error("Nothing to claim")]
    NothingToClaim,

    // === Marketplace ===
    /// Tip below the configured minimum
    #[error("Tip of {amount} is below minimum {minimum}")]
    BelowMinimumTip { minimum: Amount, amount: Amount },

    /// Tipping yourself
    #[error("Self-tipping is not allowed")]
    SelfTipNotAllowed,

    // === Runtime ===
    /// Ledger lock could not be acquired in time; retry
    #[error("Ledger is busy, try again")]
    Contended,

    /// Arithmetic overflow in a fixed-point calculation
    #[error("Arithmetic overflow in ledger calculation")]
    ArithmeticOverflow,
}

impl LedgerError {
    /// Short machine-readable name
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidListing(_) => "invalid_listing",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::AccountNotFound(_) => "account_not_found",
            Self::AccountFrozen(_) => "account_frozen",
            Self::SupplyCapExceeded { .. } => "supply_cap_exceeded",
            Self::DailyMintLimitExceeded { .. } => "daily_mint_limit_exceeded",
            Self::PositionLocked { .. } => "position_locked",
            Self::PositionNotFound(_) => "position_not_found",
            Self::UnknownPool(_) => "unknown_pool",
            Self::PoolIneligible { .. } => "pool_ineligible",
            Self::BelowMinimumStake { .. } => "below_minimum_stake",
            Self::NothingToClaim => "nothing_to_claim",
            Self::BelowMinimumTip { .. } => "below_minimum_tip",
            Self::SelfTipNotAllowed => "self_tip_not_allowed",
            Self::Contended => "contended",
            Self::ArithmeticOverflow => "arithmetic_overflow",
        }
    }

    /// True if retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contended)
    }
}
