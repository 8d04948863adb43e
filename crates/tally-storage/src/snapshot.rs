//! # Ledger Snapshots
//!
//! Full-state durability for process restarts.
//!
//! ## Format
//!
//! ```text
//! [4 bytes:  magic "TLSN"]
//! [4 bytes:  format version, little-endian u32]
//! [32 bytes: BLAKE3 checksum of body]
//! [N bytes:  bincode body (LedgerSnapshot)]
//! ```
//!
//! Decoding verifies magic, version and checksum before touching the body,
//! then checks the ledger invariants. A snapshot that fails any check is
//! refused as a whole.

use crate::store::{Counters, LedgerState, LedgerStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tally_core::{Account, AccountId, Amount, LedgerError, StakeId, StakePosition, Transaction};
use thiserror::Error;
use tracing::info;

/// Magic bytes identifying a snapshot file.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"TLSN";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 32;

/// Result alias for snapshot operations
pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;

/// Snapshot encode/decode/validation failures
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Not a ledger snapshot (bad magic)")]
    BadMagic,

    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Snapshot truncated: {0} bytes")]
    Truncated(usize),

    #[error("Snapshot checksum mismatch")]
    ChecksumMismatch,

    #[error("Snapshot body could not be decoded: {0}")]
    Decode(String),

    #[error("Snapshot body could not be encoded: {0}")]
    Encode(String),

    /// Decoded fine but violates a ledger invariant
    #[error("Snapshot is inconsistent: {0}")]
    Inconsistent(String),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Complete persisted ledger state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub accounts: BTreeMap<AccountId, Account>,
    pub transactions: Vec<Transaction>,
    pub positions: BTreeMap<StakeId, StakePosition>,
    pub total_supply: Amount,
    pub circulating_supply: Amount,
    pub burned_supply: Amount,
    pub sequence_counter: u64,
    pub next_position_id: u64,
    pub saved_at: DateTime<Utc>,
}

impl LedgerSnapshot {
    /// Copy a ledger state
    pub fn capture(state: &LedgerState, saved_at: DateTime<Utc>) -> Self {
        Self {
            accounts: state.accounts.clone(),
            transactions: state.transactions.clone(),
            positions: state.positions.clone(),
            total_supply: state.counters.total_supply,
            circulating_supply: state.counters.circulating_supply,
            burned_supply: state.counters.burned_supply,
            sequence_counter: state.counters.sequence_counter,
            next_position_id: state.counters.next_position_id,
            saved_at,
        }
    }

    /// Convert back into live state
    pub fn into_state(self) -> LedgerState {
        LedgerState {
            accounts: self.accounts,
            transactions: self.transactions,
            positions: self.positions,
            counters: Counters {
                total_supply: self.total_supply,
                circulating_supply: self.circulating_supply,
                burned_supply: self.burned_supply,
                sequence_counter: self.sequence_counter,
                next_position_id: self.next_position_id,
            },
        }
    }

    /// Header + checksum + bincode body
    pub fn encode(&self) -> SnapshotResult<Vec<u8>> {
        let body = bincode::serialize(self).map_err(|e| SnapshotError::Encode(e.to_string()))?;
        let checksum = blake3::hash(&body);

        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(SNAPSHOT_MAGIC);
        bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        bytes.extend_from_slice(checksum.as_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Parse and validate
    pub fn decode(bytes: &[u8]) -> SnapshotResult<Self> {
        if bytes.len() < 4 {
            return Err(SnapshotError::Truncated(bytes.len()));
        }
        if &bytes[..4] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        if bytes.len() < HEADER_LEN {
            return Err(SnapshotError::Truncated(bytes.len()));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..8]);
        let version = u32::from_le_bytes(version);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: version,
                expected: SNAPSHOT_VERSION,
            });
        }

        let body = &bytes[HEADER_LEN..];
        if blake3::hash(body).as_bytes()[..] != bytes[8..HEADER_LEN] {
            return Err(SnapshotError::ChecksumMismatch);
        }

        let snapshot: Self =
            bincode::deserialize(body).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Check every ledger invariant the body must satisfy
    pub fn validate(&self) -> SnapshotResult<()> {
        let inconsistent = |msg: String| Err(SnapshotError::Inconsistent(msg));

        // Log order and counter agreement
        for pair in self.transactions.windows(2) {
            if pair[1].sequence <= pair[0].sequence {
                return inconsistent(format!(
                    "sequence {} follows {}",
                    pair[1].sequence, pair[0].sequence
                ));
            }
        }
        let last = self.transactions.last().map_or(0, |tx| tx.sequence);
        if last != self.sequence_counter {
            return inconsistent(format!(
                "sequence counter {} but last transaction is {}",
                self.sequence_counter, last
            ));
        }

        // Accounts keyed by their own id
        for (key, account) in &self.accounts {
            if key != &account.id {
                return inconsistent(format!("account {} stored under key {}", account.id, key));
            }
        }

        // Conservation
        let held = self
            .accounts
            .values()
            .try_fold(Amount::ZERO, |acc, a| a.checked_total().and_then(|t| acc.checked_add(t)))
            .ok_or_else(|| SnapshotError::Inconsistent("account totals overflow".into()))?;
        if held.checked_add(self.burned_supply) != Some(self.total_supply) {
            return inconsistent(format!(
                "holdings {} + burned {} != total supply {}",
                held, self.burned_supply, self.total_supply
            ));
        }
        if self.circulating_supply.checked_add(self.burned_supply) != Some(self.total_supply) {
            return inconsistent(format!(
                "circulating {} + burned {} != total supply {}",
                self.circulating_supply, self.burned_supply, self.total_supply
            ));
        }

        // Positions
        let mut principal_by_owner: BTreeMap<&AccountId, Amount> = BTreeMap::new();
        for (key, position) in &self.positions {
            if key != &position.id {
                return inconsistent(format!("position {} stored under key {}", position.id, key));
            }
            if position.id.value() >= self.next_position_id {
                return inconsistent(format!(
                    "position {} not below next id {}",
                    position.id, self.next_position_id
                ));
            }
            if position.is_active() {
                let sum = principal_by_owner.entry(&position.owner).or_insert(Amount::ZERO);
                *sum = sum.saturating_add(position.principal);
            }
        }
        for (owner, principal) in principal_by_owner {
            let staked = self.accounts.get(owner).map(|a| a.staked);
            match staked {
                None => return inconsistent(format!("position owner {owner} has no account")),
                Some(staked) if principal > staked => {
                    return inconsistent(format!(
                        "{owner} has {principal} in active positions but only {staked} staked"
                    ))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Write atomically: temp file, fsync, rename
    pub fn write_to(&self, path: &Path) -> SnapshotResult<()> {
        let bytes = self.encode()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = Path::new(&tmp_name);
        {
            let mut file = File::create(tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(tmp, path)?;

        info!(
            path = %path.display(),
            bytes = bytes.len(),
            sequence = self.sequence_counter,
            "Wrote ledger snapshot"
        );
        Ok(())
    }

    /// Read and validate a snapshot file
    pub fn read_from(path: &Path) -> SnapshotResult<Self> {
        let bytes = fs::read(path)?;
        Self::decode(&bytes)
    }

    /// Human-readable export
    pub fn to_json_pretty(&self) -> SnapshotResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }
}

impl LedgerStore {
    /// Consistent copy of the whole ledger
    pub fn snapshot(&self) -> tally_core::Result<LedgerSnapshot> {
        let saved_at = self.now();
        self.read(|state| LedgerSnapshot::capture(state, saved_at))
    }

    /// Replace the ledger with a validated snapshot
    pub fn restore(&self, snapshot: LedgerSnapshot) -> SnapshotResult<()> {
        snapshot.validate()?;
        let sequence = snapshot.sequence_counter;
        self.replace_state(snapshot.into_state())?;
        info!(sequence, "Restored ledger from snapshot");
        Ok(())
    }
}
