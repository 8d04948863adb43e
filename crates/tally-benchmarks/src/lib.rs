//! # Tally Performance Benchmarks
//!
//! Fixtures shared by the criterion benches, and a small latency summary for
//! ad hoc timing runs.
//!
//! | Benchmark | Measures |
//! |-----------|----------|
//! | `amount` | fixed-point fee and reward arithmetic |
//! | `transfer` | one fee-bearing transfer, end to end |
//! | `sweep` | a distribution sweep over N due positions |
//! | `snapshot` | encode and validated decode of a populated ledger |
//!
//! ## Usage
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench --package tally-benchmarks
//!
//! # Run one group
//! cargo bench --package tally-benchmarks -- sweep
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_core::{AccountId, Amount, ManualClock, Result};
use tally_node::{LedgerService, NodeConfig};

/// A populated ledger on a manual clock
pub struct BenchLedger {
    pub service: LedgerService,
    pub clock: Arc<ManualClock>,
    pub users: Vec<AccountId>,
}

impl BenchLedger {
    /// Genesis plus `users` funded accounts
    pub fn new(users: usize) -> Result<Self> {
        let start = DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default();
        let clock = ManualClock::shared(start);
        let mut config = NodeConfig::default();
        config.ledger.welcome_bonus = Amount::ZERO;
        config.token.daily_mint_limit = config.token.max_supply;

        let service = LedgerService::new(&config, clock.clone())?;
        service.allocate_genesis(&config.genesis.entries())?;

        let users: Vec<AccountId> = (0..users)
            .map(|i| AccountId::new(format!("user-{i:05}")))
            .collect();
        for user in &users {
            service.mint(user, Amount::from_tokens(10_000), "bench")?;
        }

        Ok(Self { service, clock, users })
    }

    /// Every user opens one `basic` position
    pub fn with_positions(users: usize) -> Result<Self> {
        let ledger = Self::new(users)?;
        for user in &ledger.users {
            ledger
                .service
                .stake(user, "basic", Amount::from_tokens(1_000), None)?;
        }
        Ok(ledger)
    }

    /// Move time past the distribution interval so every position is due
    pub fn make_due(&self) {
        self.clock.advance(Duration::days(1));
    }
}

/// Latency statistics over raw nanosecond timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub name: String,
    pub iterations: u64,
    pub mean_ns: f64,
    pub median_ns: f64,
    pub p99_ns: f64,
    /// Operations per second at the mean latency
    pub throughput: f64,
}

impl LatencySummary {
    /// `None` for an empty sample
    pub fn from_timings(name: &str, timings: &[u64]) -> Option<Self> {
        if timings.is_empty() {
            return None;
        }
        let iterations = timings.len() as u64;
        let mean_ns = timings.iter().map(|&t| t as f64).sum::<f64>() / iterations as f64;

        let mut sorted = timings.to_vec();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        let median_ns = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
        } else {
            sorted[mid] as f64
        };
        let p99_idx = ((sorted.len() as f64 * 0.99) as usize).min(sorted.len() - 1);

        Some(Self {
            name: name.to_string(),
            iterations,
            mean_ns,
            median_ns,
            p99_ns: sorted[p99_idx] as f64,
            throughput: if mean_ns > 0.0 { 1_000_000_000.0 / mean_ns } else { f64::INFINITY },
        })
    }

    /// Print summary
    pub fn print_summary(&self) {
        println!("\n{}", self.name);
        println!("  Iterations:  {}", self.iterations);
        println!("  Mean:        {:.2}µs", self.mean_ns / 1000.0);
        println!("  Median:      {:.2}µs", self.median_ns / 1000.0);
        println!("  p99:         {:.2}µs", self.p99_ns / 1000.0);
        println!("  Throughput:  {:.2} ops/sec", self.throughput);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_latency_summary() {
        let summary = LatencySummary::from_timings("t", &[10, 20, 30, 40]).unwrap();
        assert_eq!(summary.iterations, 4);
        assert_eq!(summary.mean_ns, 25.0);
        assert_eq!(summary.median_ns, 25.0);
        assert_eq!(summary.p99_ns, 40.0);
        assert!(LatencySummary::from_timings("empty", &[]).is_none());
    }

    #[test]
    fn test_fixture_positions_become_due() {
        let ledger = BenchLedger::with_positions(5).unwrap();
        ledger.make_due();
        let report = ledger.service.run_distribution(&AtomicBool::new(false));
        assert_eq!(report.paid, 5);
    }
}
