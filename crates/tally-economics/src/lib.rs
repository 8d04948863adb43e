//! # Tally Economics
//!
//! The operations that move value through the ledger.
//!
//! ## Components
//!
//! - **Transfer Engine**: fee-bearing transfers, minting under a supply cap
//!   and daily limit, burning, fee-free system transfers
//! - **Staking Engine**: pool-gated positions with time-accrued rewards and a
//!   daily distribution sweep
//! - **Marketplace**: purchase and tip revenue splits, referral bonuses
//!
//! ## Fund Flows
//!
//! | Source | Destination | Trigger |
//! |--------|-------------|---------|
//! | sender | treasury | transfer fee |
//! | staking pool | staker | claim, sweep, compound |
//! | rewards pool | new account / referrer | welcome credit, referral bonus |
//! | buyer / tipper | marketplace fees | purchase, tip |

pub mod distribution;
pub mod marketplace;
pub mod staking;
pub mod transfer;

pub use distribution::{DistributionSchedule, SweepReport};
pub use marketplace::{split, Marketplace, MarketplacePolicy, Receipt};
pub use staking::{
    accrued_reward, ClaimTarget, Eligibility, PoolConfig, StakingEngine, UnstakeOutcome,
};
pub use transfer::{system_transfer, TokenPolicy, TransferEngine};
