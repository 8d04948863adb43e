//! Genesis allocation for a fresh ledger
//!
//! | Account | Default Allocation | Purpose |
//! |---------|--------------------|---------|
//! | system:rewards_pool | 2,000,000 | welcome credits, referral bonuses |
//! | system:staking_pool | 5,000,000 | staking rewards |
//! | system:development_fund | 1,000,000 | development |
//! | system:treasury | 0 | collects transfer fees |

use serde::{Deserialize, Serialize};
use tally_core::{AccountId, Amount, SystemAccount};

/// One initial allocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    /// Receiving account
    pub account: AccountId,
    /// Amount minted
    pub amount: Amount,
    /// Description/purpose
    #[serde(default)]
    pub label: String,
}

/// Initial allocations minted on first start
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    #[serde(default)]
    pub allocations: Vec<GenesisAllocation>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        let allocation = |role: SystemAccount, tokens: u64, label: &str| GenesisAllocation {
            account: role.id(),
            amount: Amount::from_tokens(tokens),
            label: label.to_string(),
        };
        Self {
            allocations: vec![
                allocation(SystemAccount::RewardsPool, 2_000_000, "welcome credits and referrals"),
                allocation(SystemAccount::StakingPool, 5_000_000, "staking rewards"),
                allocation(SystemAccount::DevelopmentFund, 1_000_000, "development"),
            ],
        }
    }
}

impl GenesisConfig {
    /// Sum of all allocations, `None` on overflow
    pub fn total(&self) -> Option<Amount> {
        Amount::checked_sum(self.allocations.iter().map(|a| a.amount))
    }

    /// `(account, amount)` pairs for the transfer engine
    pub fn entries(&self) -> Vec<(AccountId, Amount)> {
        self.allocations
            .iter()
            .map(|a| (a.account.clone(), a.amount))
            .collect()
    }
}
