//! Durable journal sink backed by RocksDB
//!
//! # Column Families
//!
//! - `transactions` - Finalized transaction records (key: big-endian sequence number)
//!
//! Sequence keys sort in append order, so a forward scan replays the journal
//! oldest first. Values are bincode-encoded [`TransactionRecord`]s.

use crate::{
    error::{Error, Result},
    journal::LogSink,
    types::TransactionRecord,
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Column family names
const CF_TRANSACTIONS: &str = "transactions";

/// RocksDB journal
pub struct RocksDbSink {
    db: Arc<DB>,
    path: PathBuf,
    next_seq: AtomicU64,
}

impl RocksDbSink {
    /// Open or create the journal database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create directory if not exists
        std::fs::create_dir_all(&path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_TRANSACTIONS,
            Self::cf_options_transactions(),
        )];

        let db = DB::open_cf_descriptors(&db_opts, &path, cf_descriptors)?;
        let sink = Self {
            db: Arc::new(db),
            path,
            next_seq: AtomicU64::new(0),
        };

        let next = sink.last_seq()?.map_or(0, |seq| seq + 1);
        sink.next_seq.store(next, Ordering::SeqCst);

        tracing::info!(path = ?sink.path, next_seq = next, "Opened RocksDB journal");

        Ok(sink)
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_TRANSACTIONS)
            .ok_or_else(|| Error::Sink(format!("Column family {} not found", CF_TRANSACTIONS)))
    }

    fn last_seq(&self) -> Result<Option<u64>> {
        let cf = self.cf_handle()?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(decode_seq(&key)?))
            }
            None => Ok(None),
        }
    }

    /// Every record, oldest first
    pub fn load_all(&self) -> Result<Vec<TransactionRecord>> {
        let cf = self.cf_handle()?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    /// Database location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn decode_seq(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::Sink(format!("Malformed journal key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

impl LogSink for RocksDbSink {
    fn append(&self, record: &TransactionRecord) -> Result<()> {
        let cf = self.cf_handle()?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let value = bincode::serialize(record)?;

        self.db.put_cf(cf, seq.to_be_bytes(), &value)?;

        tracing::debug!(id = %record.id, seq, "Record journaled");
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let cf = self.cf_handle()?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;
        self.next_seq.store(0, Ordering::SeqCst);

        tracing::info!(path = ?self.path, "RocksDB journal cleared");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rocksdb"
    }
}

impl std::fmt::Debug for RocksDbSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbSink")
            .field("path", &self.path)
            .field("next_seq", &self.next_seq.load(Ordering::Relaxed))
            .finish()
    }
}
