//! # Tally Core
//!
//! Core data model for the Tally token ledger.
//!
//! This crate provides the fundamental building blocks:
//! - `Amount` / `Rate` - fixed-point money and ratios (no floating point)
//! - `Account` - three-bucket balance holder with capabilities
//! - `Transaction` - append-only log entry with a sequence number
//! - `StakePosition` - one owner's stake in a pool
//! - `LedgerError` - the caller-visible error taxonomy
//! - `Clock` - injectable time source
//!
//! ## Conservation
//!
//! ```text
//!   Σ (available + staked + locked)  +  burned_supply  ==  total_supply
//!   └────────── all accounts ──────┘
//! ```

pub mod account;
pub mod amount;
pub mod clock;
pub mod error;
pub mod stake;
pub mod transaction;

pub use account::*;
pub use amount::*;
pub use clock::*;
pub use error::*;
pub use stake::*;
pub use transaction::*;

/// Token constants
pub mod constants {
    /// Token symbol
    pub const SYMBOL: &str = "TLY";

    /// Token name
    pub const NAME: &str = "Tally Token";

    /// Seconds in the 365-day reward year
    pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 3600;

    /// Seconds in a day
    pub const SECONDS_PER_DAY: u64 = 24 * 3600;

    /// Longest lock a pool may offer (ten years)
    pub const MAX_LOCK_DAYS: u32 = 3_650;

    /// Longest distribution interval (ten years)
    pub const MAX_DISTRIBUTION_INTERVAL_SECS: u64 = 3_650 * SECONDS_PER_DAY;
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::account::{Account, AccountId, Bucket, Capability, SystemAccount};
    pub use crate::amount::{Amount, Rate};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::error::{LedgerError, Result};
    pub use crate::stake::{PositionStatus, StakeId, StakePosition};
    pub use crate::transaction::{Transaction, TransactionDraft, TransactionId, TxKind};
}

#[cfg(test)]
mod tests {
    use super::constants::*;

    #[test]
    fn test_year_length() {
        assert_eq!(SECONDS_PER_YEAR, 31_536_000);
        assert_eq!(SECONDS_PER_YEAR / SECONDS_PER_DAY, 365);
    }
}
