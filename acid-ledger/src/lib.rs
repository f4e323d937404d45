//! ACID Ledger
//!
//! Small banking ledger that shows how concurrency-control strategies and
//! isolation levels change what concurrent transfers and readers observe.
//!
//! # Architecture
//!
//! - **Ledger Store**: Authoritative account table, the only writer of balances
//! - **Strategies**: Uncontrolled, atomic, optimistic (version check) and pessimistic (locks)
//! - **Orchestrator**: One transfer, one terminal record, locks always released
//! - **Isolation Probe**: Multi-step reads under emulated isolation levels
//! - **Transaction Log**: Append-only audit trail with a pluggable durable sink
//!
//! # Invariants
//!
//! - Money conservation: Σ(balances) unchanged by any committed atomic-path transfer
//! - Non-negativity: no committed transfer leaves a negative balance
//! - Exactly one terminal record per transfer attempt
//! - Every lock acquired by a transfer is released on every exit path

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod context;
pub mod error;
pub mod isolation;
pub mod journal;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod orchestrator;
pub mod probe;
pub mod scenarios;
pub mod store;
pub mod strategy;
pub mod types;

#[cfg(feature = "rocksdb")]
pub mod storage;

// Re-exports
pub use config::Config;
pub use context::{CancelToken, OpContext};
pub use error::{Error, Result};
pub use journal::{JsonLinesSink, LogSink, LogSummary, NullSink, TransactionLog};
pub use ledger::{DirtyWrite, Ledger};
pub use probe::{FnPacer, Pacer, ProbePhase, ProbeResult, SleepPacer};
pub use types::{
    Account, AccountId, IsolationLevel, Strategy, TransactionRecord, TransactionStatus,
    TransferOutcome, TransferRequest,
};

#[cfg(feature = "rocksdb")]
pub use storage::RocksDbSink;
