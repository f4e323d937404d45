//! Transaction log
//!
//! Append-only audit trail of transfer attempts. The in-memory log is
//! authoritative; every appended record is also handed to a pluggable
//! [`LogSink`] for durability. Sink failures are logged and counted but never
//! change the outcome of the transfer that produced the record.

use crate::{
    error::{Error, Result},
    metrics::Metrics,
    types::{AccountId, TransactionRecord, TransactionStatus},
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Durable destination for finalized records
pub trait LogSink: Send + Sync {
    /// Persist one record
    fn append(&self, record: &TransactionRecord) -> Result<()>;

    /// Drop everything persisted so far
    fn reset(&self) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Sink that keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn append(&self, _record: &TransactionRecord) -> Result<()> {
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// One JSON object per line, flushed on every append
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open (or create) the journal file in append mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        tracing::info!(path = ?path, "Opened JSON-lines journal");

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Read every record back, oldest first
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<TransactionRecord>> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }

    /// Journal location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for JsonLinesSink {
    fn append(&self, record: &TransactionRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        drop(file);
        let file = OpenOptions::new().append(true).open(&self.path)?;
        *writer = BufWriter::new(file);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}

/// Counts per terminal status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSummary {
    /// All records
    pub total: usize,
    /// `success`
    pub success: usize,
    /// `failed`
    pub failed: usize,
    /// `rolled_back`
    pub rolled_back: usize,
}

/// Append-only record of transfer attempts
pub struct TransactionLog {
    records: RwLock<Vec<TransactionRecord>>,
    sink: Box<dyn LogSink>,
    metrics: Metrics,
}

impl TransactionLog {
    /// Log with a durable sink
    pub fn new(sink: Box<dyn LogSink>, metrics: Metrics) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            sink,
            metrics,
        }
    }

    /// In-memory only
    pub fn in_memory() -> Self {
        Self::new(Box::new(NullSink), Metrics::default())
    }

    /// Append a finalized record
    ///
    /// Pending records are rejected: a record enters the log exactly once,
    /// with its terminal status.
    pub fn append(&self, record: TransactionRecord) -> Result<()> {
        if !record.status.is_terminal() {
            tracing::error!(id = %record.id, "Refusing to log a pending record");
            return Err(Error::InvariantViolation(format!(
                "record {} appended while still pending",
                record.id
            )));
        }

        if let Err(e) = self.sink.append(&record) {
            self.metrics.record_sink_error();
            tracing::warn!(
                id = %record.id,
                sink = self.sink.name(),
                error = %e,
                "Durable sink rejected record"
            );
        }

        tracing::debug!(
            id = %record.id,
            from = %record.from,
            to = %record.to,
            amount = %record.amount,
            status = %record.status,
            "Transaction recorded"
        );

        self.records.write().push(record);
        Ok(())
    }

    /// All records, newest first
    pub fn list(&self) -> Vec<TransactionRecord> {
        self.records.read().iter().rev().cloned().collect()
    }

    /// Records where the account is source or destination, newest first
    pub fn for_account(&self, account: &AccountId) -> Vec<TransactionRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .filter(|r| r.involves(account))
            .cloned()
            .collect()
    }

    /// Counts by status
    pub fn summary(&self) -> LogSummary {
        self.records
            .read()
            .iter()
            .fold(LogSummary::default(), |mut acc, r| {
                acc.total += 1;
                match r.status {
                    TransactionStatus::Success => acc.success += 1,
                    TransactionStatus::Failed => acc.failed += 1,
                    TransactionStatus::RolledBack => acc.rolled_back += 1,
                    TransactionStatus::Pending => {}
                }
                acc
            })
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Remove every record, durable copy included
    pub fn clear(&self) -> Result<()> {
        let mut records = self.records.write();
        self.sink.reset()?;
        records.clear();
        Ok(())
    }
}

impl std::fmt::Debug for TransactionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLog")
            .field("records", &self.len())
            .field("sink", &self.sink.name())
            .finish()
    }
}
