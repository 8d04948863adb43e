//! # Tally Node
//!
//! Configuration, the ledger service object and the node runtime.
//!
//! ## Components
//!
//! - **Config**: TOML `NodeConfig` with validated sections
//! - **Genesis**: initial allocations minted on first start
//! - **Service**: `LedgerService`, the single entry point to the ledger
//! - **Node**: background distribution sweep, periodic snapshots, shutdown

pub mod config;
pub mod genesis;
pub mod node;
pub mod service;

pub use config::{ConfigError, NodeConfig};
pub use genesis::{GenesisAllocation, GenesisConfig};
pub use node::{NodeState, TallyNode};
pub use service::{LedgerService, Origin};
