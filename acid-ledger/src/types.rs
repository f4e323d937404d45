//! Core types for the ledger
//!
//! All types are designed for:
//! - Exact arithmetic (Decimal for money)
//! - Serde round-tripping (JSON journal, bincode in RocksDB)
//! - Cheap snapshots (accounts are plain values copied out of the store)

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account identifier (account number such as `ACC001`)
///
/// Ordering is lexicographic and defines the global lock acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Account snapshot as stored in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique, immutable identifier
    pub id: AccountId,

    /// Balance (exact decimal)
    pub balance: Decimal,

    /// Incremented by the store on every committed mutation
    pub version: u64,
}

impl Account {
    /// Fresh account at version 0
    pub fn new(id: impl Into<AccountId>, balance: Decimal) -> Self {
        Self {
            id: id.into(),
            balance,
            version: 0,
        }
    }

    /// Same account with a different balance, version untouched
    pub fn with_balance(&self, balance: Decimal) -> Self {
        Self {
            id: self.id.clone(),
            balance,
            version: self.version,
        }
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Attempt in flight (never stored in the log)
    Pending,
    /// Both legs committed
    Success,
    /// Failed before any write was applied
    Failed,
    /// Aborted after a partial write was applied
    RolledBack,
}

impl TransactionStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concurrency-control strategy used by a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// No isolation, writes applied one by one
    Uncontrolled,
    /// All-or-nothing batch commit, no locking
    Atomic,
    /// Version check at commit time
    Optimistic,
    /// Exclusive locks held for the whole read-modify-write
    Pessimistic,
}

impl Strategy {
    /// All strategies, in declaration order
    pub const ALL: [Strategy; 4] = [
        Strategy::Uncontrolled,
        Strategy::Atomic,
        Strategy::Optimistic,
        Strategy::Pessimistic,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Uncontrolled => "uncontrolled",
            Strategy::Atomic => "atomic",
            Strategy::Optimistic => "optimistic",
            Strategy::Pessimistic => "pessimistic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', "-")
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "uncontrolled" | "non-atomic" => Ok(Strategy::Uncontrolled),
            "atomic" => Ok(Strategy::Atomic),
            "optimistic" | "optimistic-lock" => Ok(Strategy::Optimistic),
            "pessimistic" | "pessimistic-lock" => Ok(Strategy::Pessimistic),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}

/// Emulated isolation level for multi-step reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// No read barrier, staged writes visible
    ReadUncommitted,
    /// Committed state only, re-reads may differ
    ReadCommitted,
    /// First read of an account is pinned, aggregates stay live
    RepeatableRead,
    /// One consistent snapshot for the whole operation
    Serializable,
}

impl IsolationLevel {
    /// All levels, weakest first
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "read-uncommitted",
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::RepeatableRead => "repeatable-read",
            IsolationLevel::Serializable => "serializable",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "read-uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read-committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable-read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(Error::UnknownIsolationLevel(s.to_string())),
        }
    }
}

/// Audit record of one transfer attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique record ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Source account
    pub from: AccountId,

    /// Destination account
    pub to: AccountId,

    /// Requested amount
    pub amount: Decimal,

    /// Strategy the transfer ran under
    pub strategy: Strategy,

    /// Creation timestamp
    pub timestamp: DateTime<Utc>,

    /// Current status
    pub status: TransactionStatus,

    /// Error description for failed attempts
    pub error: Option<String>,
}

impl TransactionRecord {
    /// Pending record for a new attempt
    pub fn pending(request: &TransferRequest) -> Self {
        Self {
            id: Uuid::now_v7(),
            from: request.from.clone(),
            to: request.to.clone(),
            amount: request.amount,
            strategy: request.strategy,
            timestamp: Utc::now(),
            status: TransactionStatus::Pending,
            error: None,
        }
    }

    /// Set the terminal status, consuming the pending record
    pub fn finalize(mut self, status: TransactionStatus, error: Option<String>) -> Self {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.error = error;
        self
    }

    /// Check if the record involves an account on either side
    pub fn involves(&self, account: &AccountId) -> bool {
        &self.from == account || &self.to == account
    }
}

/// Transfer request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Source account
    pub from: AccountId,
    /// Destination account
    pub to: AccountId,
    /// Amount to move
    pub amount: Decimal,
    /// Concurrency-control strategy
    pub strategy: Strategy,
    /// Fail right after the debit write is issued
    #[serde(default)]
    pub simulate_error: bool,
}

impl TransferRequest {
    /// Create new request
    pub fn new(
        from: impl Into<AccountId>,
        to: impl Into<AccountId>,
        amount: Decimal,
        strategy: Strategy,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            strategy,
            simulate_error: false,
        }
    }

    /// Enable or disable the post-debit fault
    pub fn with_simulated_error(mut self, simulate_error: bool) -> Self {
        self.simulate_error = simulate_error;
        self
    }

    /// Check preconditions (distinct accounts, positive amount)
    pub fn validate(&self) -> Result<()> {
        if self.from == self.to {
            return Err(Error::InvalidRequest(format!(
                "source and destination are the same account ({})",
                self.from
            )));
        }
        if self.amount <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

/// Caller-facing view of a transfer result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Terminal status
    pub status: TransactionStatus,
    /// Error description when not successful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferOutcome {
    /// Check if the transfer committed
    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Success
    }
}

impl From<&Result<TransactionRecord>> for TransferOutcome {
    fn from(result: &Result<TransactionRecord>) -> Self {
        match result {
            Ok(record) => Self {
                status: record.status,
                error: record.error.clone(),
            },
            Err(err) => Self {
                status: TransactionStatus::Failed,
                error: Some(err.to_string()),
            },
        }
    }
}
