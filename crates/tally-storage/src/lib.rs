//! # Tally Storage
//!
//! The ledger store and its durable snapshot format.
//!
//! ## Layout
//!
//! - `store` - in-memory state behind one lock, all-or-nothing store transactions
//! - `snapshot` - `TLSN` snapshot encoding, validation and atomic file writes

pub mod snapshot;
pub mod store;

pub use snapshot::{LedgerSnapshot, SnapshotError, SnapshotResult, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use store::{
    Batch, Counters, Delta, LedgerState, LedgerStats, LedgerStore, Mutation, StoreConfig, StoreTxn,
    SupplyChange,
};
