//! Stake positions
//!
//! ```text
//! stake ──► Active ──(claim | compound | partial unstake)*──► Active
//!              │
//!              └──(full unstake)──► Closed
//! ```

use crate::account::AccountId;
use crate::amount::{Amount, Rate};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sequential stake position identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StakeId(u64);

impl StakeId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stake-{:06}", self.0)
    }
}

impl fmt::Debug for StakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StakeId({})", self.0)
    }
}

impl FromStr for StakeId {
    type Err = std::num::ParseIntError;

    /// Accepts `stake-000042` or `42`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().strip_prefix("stake-").unwrap_or(s.trim());
        digits.parse().map(Self)
    }
}

/// Position lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Closed,
}

/// One owner's stake in a pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    /// Position id
    pub id: StakeId,

    /// Owning account
    pub owner: AccountId,

    /// Pool name
    pub pool: String,

    /// Principal still staked
    pub principal: Amount,

    /// When the position was opened
    pub start_time: DateTime<Utc>,

    /// Reward accrual restarts from here
    pub last_claim_time: DateTime<Utc>,

    /// Voluntary lock in days (0 = flexible)
    pub lock_days: u32,

    /// Reward multiplier (>= 1.0)
    pub multiplier: Rate,

    /// Rewards settled so far (claimed or compounded)
    pub accumulated_rewards: Amount,

    /// Lifecycle state
    pub status: PositionStatus,
}

impl StakePosition {
    /// Open a new active position
    pub fn open(
        id: StakeId,
        owner: AccountId,
        pool: impl Into<String>,
        principal: Amount,
        lock_days: u32,
        multiplier: Rate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            pool: pool.into(),
            principal,
            start_time: now,
            last_claim_time: now,
            lock_days,
            multiplier,
            accumulated_rewards: Amount::ZERO,
            status: PositionStatus::Active,
        }
    }

    /// True while the position accrues rewards
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// End of the lock period (equal to `start_time` when flexible).
    /// `None` when the end falls outside the representable calendar.
    pub fn unlocks_at(&self) -> Option<DateTime<Utc>> {
        self.start_time.checked_add_signed(Duration::days(i64::from(self.lock_days)))
    }

    /// Unstaking is refused while `now - start_time < lock_days`
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_days > 0 && self.unlocks_at().map_or(true, |end| now < end)
    }

    /// Seconds of accrual since the last claim; zero if the clock is behind
    pub fn accrual_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.last_claim_time).num_seconds()).unwrap_or(0)
    }
}
