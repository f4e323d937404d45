//! Main ledger facade
//!
//! Ties the store, transaction log, lock table and orchestrator together
//! into the synchronous call surface used by front ends and the demo.
//!
//! # Example
//!
//! ```no_run
//! use acid_ledger::{Config, Ledger, Strategy, TransferRequest};
//! use rust_decimal::Decimal;
//!
//! fn main() -> acid_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!     ledger.reset()?;
//!
//!     let request = TransferRequest::new("ACC001", "ACC002", Decimal::new(200, 0), Strategy::Atomic);
//!     let record = ledger.transfer(&request)?;
//!     assert!(record.status.is_terminal());
//!
//!     ledger.verify_conservation()?;
//!     Ok(())
//! }
//! ```

use crate::{
    config::{Config, JournalConfig},
    context::OpContext,
    error::{Error, Result},
    journal::{JsonLinesSink, LogSink, LogSummary, NullSink, TransactionLog},
    locks::{LockMode, LockTable},
    metrics::Metrics,
    orchestrator::TransferOrchestrator,
    probe::{IsolationProbe, Pacer, ProbeResult, SleepPacer},
    store::{LedgerStore, StagedWrite},
    types::{Account, AccountId, IsolationLevel, TransactionRecord, TransferRequest},
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Main ledger interface
#[derive(Debug, Clone)]
pub struct Ledger {
    store: Arc<LedgerStore>,
    log: Arc<TransactionLog>,
    locks: Arc<LockTable>,
    metrics: Metrics,
    orchestrator: TransferOrchestrator,

    /// Total the ledger should hold: seeds, opened accounts and external mutations
    expected_total: Arc<Mutex<Decimal>>,

    config: Arc<Config>,
}

impl Ledger {
    /// In-memory ledger, no durable journal
    pub fn new(config: Config) -> Self {
        Self::with_sink(config, Box::new(NullSink))
    }

    /// Ledger journaling to `sink`
    pub fn with_sink(config: Config, sink: Box<dyn LogSink>) -> Self {
        let metrics = Metrics::default();
        let store = Arc::new(LedgerStore::new());
        let log = Arc::new(TransactionLog::new(sink, metrics.clone()));
        let locks = Arc::new(LockTable::new());
        let orchestrator = TransferOrchestrator::new(
            store.clone(),
            log.clone(),
            locks.clone(),
            metrics.clone(),
            config.transfer.clone(),
        );

        Self {
            store,
            log,
            locks,
            metrics,
            orchestrator,
            expected_total: Arc::new(Mutex::new(Decimal::ZERO)),
            config: Arc::new(config),
        }
    }

    /// Ledger with the journal selected in `config`
    pub fn open(config: Config) -> Result<Self> {
        let sink: Box<dyn LogSink> = match &config.journal {
            JournalConfig::None => Box::new(NullSink),
            JournalConfig::JsonLines { path } => Box::new(JsonLinesSink::open(path)?),
            #[cfg(feature = "rocksdb")]
            JournalConfig::Rocksdb { path } => Box::new(crate::storage::RocksDbSink::open(path)?),
            #[cfg(not(feature = "rocksdb"))]
            JournalConfig::Rocksdb { .. } => {
                return Err(Error::Config(
                    "rocksdb journal requires the `rocksdb` feature".to_string(),
                ))
            }
        };

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            journal = sink.name(),
            "Ledger opened"
        );

        Ok(Self::with_sink(config, sink))
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Underlying store
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    // Accounts

    /// Reset to exactly `seed` and clear the transaction log
    pub fn init_accounts<I, S>(&self, seed: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<AccountId>,
    {
        let mut accounts: Vec<Account> = Vec::new();
        for (id, balance) in seed {
            let account = Account::new(id, balance);
            if account.balance < Decimal::ZERO {
                return Err(Error::InvalidRequest(format!(
                    "seed balance for {} is negative ({})",
                    account.id, account.balance
                )));
            }
            if accounts.iter().any(|a| a.id == account.id) {
                return Err(Error::DuplicateAccount(account.id));
            }
            accounts.push(account);
        }

        let total: Decimal = accounts.iter().map(|a| a.balance).sum();
        let count = accounts.len();

        // Lock sets in flight keep excluding new transfers across the reset
        let mut expected = self.expected_total.lock();
        self.log.clear()?;
        self.store.reset(accounts);
        *expected = total;
        drop(expected);

        tracing::info!(accounts = count, total = %total, "Ledger initialized");
        Ok(())
    }

    /// Reset to the configured seed
    pub fn reset(&self) -> Result<()> {
        self.init_accounts(
            self.config
                .seed_accounts()
                .into_iter()
                .map(|account| (account.id, account.balance)),
        )
    }

    /// Create a new account (the phantom a concurrent probe may see)
    pub fn open_account(&self, id: impl Into<AccountId>, balance: Decimal) -> Result<Account> {
        let account = Account::new(id, balance);
        if balance < Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "opening balance for {} is negative ({})",
                account.id, balance
            )));
        }

        let mut expected = self.expected_total.lock();
        let account = self.store.insert(account)?;
        *expected += balance;

        tracing::info!(account = %account.id, balance = %balance, "Account opened");
        Ok(account)
    }

    /// All accounts, ordered by id
    pub fn list_accounts(&self) -> Vec<Account> {
        self.store.all()
    }

    /// One account
    pub fn account(&self, id: &AccountId) -> Result<Account> {
        self.store.get(id)
    }

    // Transfers

    /// Run a transfer; pessimistic locking honours `transfer.lock_timeout_ms`
    pub fn transfer(&self, request: &TransferRequest) -> Result<TransactionRecord> {
        self.transfer_with(request, &OpContext::background())
    }

    /// Run a transfer under an explicit deadline / cancellation context
    pub fn transfer_with(
        &self,
        request: &TransferRequest,
        ctx: &OpContext,
    ) -> Result<TransactionRecord> {
        self.orchestrator.transfer(request, ctx)
    }

    /// All transaction records, newest first
    pub fn list_transactions(&self) -> Vec<TransactionRecord> {
        self.log.list()
    }

    /// Records touching an account, newest first
    pub fn transactions_for(&self, id: &AccountId) -> Vec<TransactionRecord> {
        self.log.for_account(id)
    }

    /// Record counts by status
    pub fn transaction_summary(&self) -> LogSummary {
        self.log.summary()
    }

    // Isolation

    /// Probe an account with the configured waits
    pub fn observe_isolation(&self, id: &AccountId, level: IsolationLevel) -> Result<ProbeResult> {
        let pacer = SleepPacer {
            between_reads: Duration::from_millis(self.config.probe.first_wait_ms),
            between_counts: Duration::from_millis(self.config.probe.second_wait_ms),
        };
        self.observe_isolation_with(id, level, &pacer, &OpContext::background())
    }

    /// Probe an account with custom pacing
    pub fn observe_isolation_with(
        &self,
        id: &AccountId,
        level: IsolationLevel,
        pacer: &dyn Pacer,
        ctx: &OpContext,
    ) -> Result<ProbeResult> {
        self.metrics.record_probe(level);
        IsolationProbe::new(&self.store).observe(id, level, pacer, ctx)
    }

    /// Apply a committed delta outside any transfer (the competing writer)
    pub fn mutate_balance(&self, id: &AccountId, delta: Decimal) -> Result<Account> {
        let mut expected = self.expected_total.lock();
        let account = self.store.adjust(id, delta)?;
        *expected += delta;

        tracing::info!(account = %id, delta = %delta, balance = %account.balance, "Balance mutated");
        Ok(account)
    }

    /// Stage `delta`, hold it uncommitted for `probe.long_update_hold_ms`, then commit
    ///
    /// While the hold lasts only `read-uncommitted` readers see the new
    /// balance. If `ctx` is cancelled or expires the write is discarded.
    pub fn long_running_update(
        &self,
        id: &AccountId,
        delta: Decimal,
        ctx: &OpContext,
    ) -> Result<Account> {
        let hold = Duration::from_millis(self.config.probe.long_update_hold_ms);
        let dirty = self.begin_dirty_write(id, delta)?;

        tracing::info!(account = %id, delta = %delta, hold_ms = hold.as_millis() as u64, "Long-running update holding");
        ctx.sleep(hold, "long-running update")?;

        dirty.commit()
    }

    /// Install an uncommitted delta the caller commits or drops
    pub fn begin_dirty_write(&self, id: &AccountId, delta: Decimal) -> Result<DirtyWrite<'_>> {
        let staged = self.store.stage(id, delta)?;
        Ok(DirtyWrite {
            staged,
            expected_total: &self.expected_total,
        })
    }

    /// Consistent read of several accounts under shared locks
    pub fn read_locked(&self, ids: &[AccountId], ctx: &OpContext) -> Result<Vec<Account>> {
        let ctx = match self.config.transfer.lock_timeout() {
            Some(timeout) => ctx.bounded(timeout),
            None => ctx.clone(),
        };
        let held = self.locks.acquire(ids, LockMode::Shared, &ctx)?;
        self.metrics.record_lock_wait(held.waited());

        let accounts = held
            .accounts()
            .iter()
            .map(|id| self.store.get(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(accounts)
    }

    // Invariants

    /// Sum of committed balances
    pub fn total_balance(&self) -> Decimal {
        self.store.total()
    }

    /// Actual minus expected total; zero unless money was created or destroyed
    pub fn conservation_drift(&self) -> Decimal {
        let expected = self.expected_total.lock();
        self.store.total() - *expected
    }

    /// Fail with [`Error::InvariantViolation`] if the ledger total drifted
    pub fn verify_conservation(&self) -> Result<()> {
        let drift = self.conservation_drift();
        if drift.is_zero() {
            return Ok(());
        }

        tracing::error!(drift = %drift, total = %self.store.total(), "Conservation violated");
        Err(Error::InvariantViolation(format!(
            "ledger total drifted by {}",
            drift
        )))
    }
}

/// Uncommitted write returned by [`Ledger::begin_dirty_write`]
///
/// Dropping it discards the delta.
#[derive(Debug)]
#[must_use = "dropping a dirty write discards it"]
pub struct DirtyWrite<'a> {
    staged: StagedWrite<'a>,
    expected_total: &'a Mutex<Decimal>,
}

impl DirtyWrite<'_> {
    /// Target account
    pub fn account(&self) -> &AccountId {
        self.staged.account()
    }

    /// Commit the delta
    pub fn commit(self) -> Result<Account> {
        let delta = self.staged.delta();
        let mut expected = self.expected_total.lock();
        let account = self.staged.commit()?;
        *expected += delta;
        Ok(account)
    }

    /// Discard the delta
    pub fn rollback(self) {
        self.staged.rollback();
    }
}
