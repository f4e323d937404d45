//! Error types for the ledger

use crate::types::AccountId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Account does not exist in the store
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Source balance lower than the requested amount
    #[error("Insufficient funds on {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Debited account
        account: AccountId,
        /// Balance observed at read time
        balance: Decimal,
        /// Requested amount
        requested: Decimal,
    },

    /// Optimistic version check failed at commit
    #[error("Version conflict on {account}: expected version {expected}, found {actual}")]
    Conflict {
        /// Account whose version moved
        account: AccountId,
        /// Version recorded at read time
        expected: u64,
        /// Version found at commit time
        actual: u64,
    },

    /// Pessimistic lock not acquired before the deadline
    #[error("Lock timeout on {account} after {waited_ms}ms")]
    LockTimeout {
        /// Account whose lock could not be taken
        account: AccountId,
        /// Time spent waiting
        waited_ms: u64,
    },

    /// Invariant violation (money conservation, negative balance, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Malformed request (same account on both sides, non-positive amount, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Account id already present
    #[error("Account already exists: {0}")]
    DuplicateAccount(AccountId),

    /// Strategy name not recognised
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Isolation level name not recognised
    #[error("Unknown isolation level: {0}")]
    UnknownIsolationLevel(String),

    /// Failure injected on purpose by the caller
    #[error("Injected fault: {0}")]
    InjectedFault(String),

    /// Operation cancelled through its token
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Operation ran past its deadline
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Another uncommitted write is staged on the account
    #[error("Uncommitted write already in progress on {0}")]
    DirtyWriteInProgress(AccountId),

    /// Durable log sink error
    #[error("Sink error: {0}")]
    Sink(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors a caller may reasonably retry (conflicts and lock timeouts)
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::LockTimeout { .. })
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Sink(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Sink(format!("bincode: {}", err))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
