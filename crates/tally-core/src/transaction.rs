//! Transaction log entries
//!
//! The log is append-only. A [`TransactionDraft`] describes what an operation
//! wants to record; the store seals it into a [`Transaction`] at commit time,
//! assigning the next sequence number and the timestamp.
//!
//! Transaction ids are content hashes:
//!
//! ```text
//! TransactionId = BLAKE3(sequence || from || to || amount || fee || kind || timestamp)[..16]
//! ```
//!
//! so replaying the same operations against a restored ledger yields the same
//! ids.

use crate::account::AccountId;
use crate::amount::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex transaction identifier
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

/// What a transaction did
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Transfer,
    Mint,
    Burn,
    Reward,
    Stake,
    Unstake,
    Compound,
    Purchase,
    Tip,
    ReferralBonus,
}

impl TxKind {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Mint => "mint",
            Self::Burn => "burn",
            Self::Reward => "reward",
            Self::Stake => "stake",
            Self::Unstake => "unstake",
            Self::Compound => "compound",
            Self::Purchase => "purchase",
            Self::Tip => "tip",
            Self::ReferralBonus => "referral_bonus",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement status. Operations are all-or-nothing, so every logged
/// transaction is confirmed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    #[default]
    Confirmed,
}

/// An operation's record before it is sealed into the log
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionDraft {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    pub fee: Amount,
    pub kind: TxKind,
    pub description: String,
}

impl TransactionDraft {
    /// Fee-free draft
    pub fn new(
        kind: TxKind,
        from: impl Into<AccountId>,
        to: impl Into<AccountId>,
        amount: Amount,
        description: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            fee: Amount::ZERO,
            kind,
            description: description.into(),
        }
    }

    /// Attach a fee
    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee = fee;
        self
    }
}

/// Immutable log entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content hash id
    pub id: TransactionId,

    /// Global commit order
    pub sequence: u64,

    /// Debited party
    pub from: AccountId,

    /// Credited party
    pub to: AccountId,

    /// Principal amount moved
    pub amount: Amount,

    /// Fee charged on top of `amount`
    pub fee: Amount,

    /// Operation kind
    pub kind: TxKind,

    /// Free-form note
    pub description: String,

    /// Commit time
    pub timestamp: DateTime<Utc>,

    /// Always confirmed
    #[serde(default)]
    pub status: TxStatus,
}

impl Transaction {
    /// Seal a draft at the given sequence and time
    pub fn seal(draft: TransactionDraft, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        let id = Self::compute_id(&draft, sequence, timestamp);
        Self {
            id,
            sequence,
            from: draft.from,
            to: draft.to,
            amount: draft.amount,
            fee: draft.fee,
            kind: draft.kind,
            description: draft.description,
            timestamp,
            status: TxStatus::Confirmed,
        }
    }

    fn compute_id(draft: &TransactionDraft, sequence: u64, timestamp: DateTime<Utc>) -> TransactionId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&sequence.to_le_bytes());
        hasher.update(draft.from.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(draft.to.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(&draft.amount.raw().to_le_bytes());
        hasher.update(&draft.fee.raw().to_le_bytes());
        hasher.update(draft.kind.as_str().as_bytes());
        hasher.update(&timestamp.timestamp_micros().to_le_bytes());
        TransactionId(hex::encode(&hasher.finalize().as_bytes()[..16]))
    }

    /// True if the account is either party
    pub fn involves(&self, account: &AccountId) -> bool {
        &self.from == account || &self.to == account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft() -> TransactionDraft {
        TransactionDraft::new(TxKind::Transfer, "alice", "bob", Amount::from_tokens(5), "gift")
            .with_fee(Amount::from_raw(5_000_000))
    }

    #[test]
    fn test_seal_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let a = Transaction::seal(draft(), 7, ts);
        let b = Transaction::seal(draft(), 7, ts);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.as_str().len(), 32);
        assert_eq!(a.status, TxStatus::Confirmed);
    }

    #[test]
    fn test_sequence_changes_id() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let a = Transaction::seal(draft(), 1, ts);
        let b = Transaction::seal(draft(), 2, ts);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_involves() {
        let tx = Transaction::seal(draft(), 1, Utc::now());
        assert!(tx.involves(&AccountId::from("alice")));
        assert!(tx.involves(&AccountId::from("bob")));
        assert!(!tx.involves(&AccountId::from("carol")));
    }
}
