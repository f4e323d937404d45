//! Transfer orchestrator
//!
//! Drives one two-account transfer through a concurrency-control strategy
//! and guarantees that every invocation leaves exactly one terminal record in
//! the transaction log:
//!
//! 1. pending record created, finalized as `failed` (or `rolled_back` after
//!    an applied write) if the call unwinds
//! 2. request validated, access acquired through the strategy
//! 3. both accounts read, funds checked
//! 4. critical-section delay (optimistic think time, pessimistic hold)
//! 5. debit written, optional injected fault, credit written, commit
//! 6. record finalized and appended, then access released
//!
//! Errors are propagated to the caller after the record is appended; nothing
//! is retried here.

use crate::{
    config::TransferConfig,
    context::OpContext,
    error::{Error, Result},
    journal::TransactionLog,
    locks::LockTable,
    metrics::Metrics,
    store::LedgerStore,
    strategy::{control_for, Access},
    types::{Account, Strategy, TransactionRecord, TransactionStatus, TransferRequest},
};
use std::sync::Arc;

/// Coordinates transfers over a shared store and log
#[derive(Debug, Clone)]
pub struct TransferOrchestrator {
    store: Arc<LedgerStore>,
    log: Arc<TransactionLog>,
    locks: Arc<LockTable>,
    metrics: Metrics,
    config: TransferConfig,
}

impl TransferOrchestrator {
    /// Create orchestrator
    pub fn new(
        store: Arc<LedgerStore>,
        log: Arc<TransactionLog>,
        locks: Arc<LockTable>,
        metrics: Metrics,
        config: TransferConfig,
    ) -> Self {
        Self {
            store,
            log,
            locks,
            metrics,
            config,
        }
    }

    /// Timing configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Execute a transfer
    ///
    /// Returns the finalized `success` record, or the error that ended the
    /// attempt. Either way one terminal record has been appended.
    pub fn transfer(&self, request: &TransferRequest, ctx: &OpContext) -> Result<TransactionRecord> {
        let mut pending = PendingRecord::new(&self.log, TransactionRecord::pending(request));

        tracing::info!(
            id = %pending.id(),
            from = %request.from,
            to = %request.to,
            amount = %request.amount,
            strategy = %request.strategy,
            simulate_error = request.simulate_error,
            "Transfer started"
        );

        if let Err(e) = request.validate() {
            return self.conclude(&mut pending, Err(e), 0);
        }

        let control = control_for(request.strategy, &self.locks, self.config.lock_timeout());
        let ids = [request.from.clone(), request.to.clone()];

        let mut access = match control.acquire(&self.store, &ids, ctx) {
            Ok(access) => access,
            Err(e) => return self.conclude(&mut pending, Err(e), 0),
        };
        if request.strategy == Strategy::Pessimistic {
            self.metrics.record_lock_wait(access.waited());
        }

        let result = self.run(request, access.as_mut(), &mut pending, ctx);
        let applied = access.applied_writes();

        // Record lands before the locks go back
        let concluded = self.conclude(&mut pending, result, applied);
        drop(access);
        concluded
    }

    fn run(
        &self,
        request: &TransferRequest,
        access: &mut dyn Access,
        pending: &mut PendingRecord<'_>,
        ctx: &OpContext,
    ) -> Result<()> {
        let from = access.read(&request.from)?;
        let to = access.read(&request.to)?;

        if from.balance < request.amount {
            return Err(Error::InsufficientFunds {
                account: from.id.clone(),
                balance: from.balance,
                requested: request.amount,
            });
        }

        ctx.sleep(
            self.config.work_delay(request.strategy),
            "transfer critical section",
        )?;

        let debited = from.with_balance(from.balance - request.amount);
        let credited = to.with_balance(to.balance + request.amount);
        check_pair(&from, &to, &debited, &credited)?;

        access.write(debited)?;
        pending.applied = access.applied_writes();

        if request.simulate_error {
            return Err(Error::InjectedFault(format!(
                "simulated failure after debiting {}",
                request.from
            )));
        }

        access.write(credited)?;
        pending.applied = access.applied_writes();
        access.commit()
    }

    fn conclude(
        &self,
        pending: &mut PendingRecord<'_>,
        result: Result<()>,
        applied_writes: usize,
    ) -> Result<TransactionRecord> {
        // rolled_back only when a write already reached the store
        let status = match &result {
            Ok(()) => TransactionStatus::Success,
            Err(_) if applied_writes > 0 => TransactionStatus::RolledBack,
            Err(_) => TransactionStatus::Failed,
        };
        let error = result.as_ref().err().map(ToString::to_string);

        let record = pending.finish(status, error)?;
        self.metrics.record_transfer(record.strategy, status);

        match result {
            Ok(()) => {
                tracing::info!(
                    id = %record.id,
                    from = %record.from,
                    to = %record.to,
                    amount = %record.amount,
                    strategy = %record.strategy,
                    "Transfer committed"
                );
                Ok(record)
            }
            Err(e) => {
                if matches!(e, Error::Conflict { .. }) {
                    self.metrics.record_conflict();
                }
                if matches!(e, Error::InvariantViolation(_)) {
                    tracing::error!(id = %record.id, error = %e, "Transfer broke an invariant");
                } else {
                    tracing::warn!(
                        id = %record.id,
                        strategy = %record.strategy,
                        status = %status,
                        error = %e,
                        "Transfer did not commit"
                    );
                }
                Err(e)
            }
        }
    }
}

/// Non-negative debit and conservation across the pair
fn check_pair(from: &Account, to: &Account, debited: &Account, credited: &Account) -> Result<()> {
    if debited.balance < rust_decimal::Decimal::ZERO {
        return Err(Error::InvariantViolation(format!(
            "debit would leave {} at {}",
            debited.id, debited.balance
        )));
    }
    if from.balance + to.balance != debited.balance + credited.balance {
        return Err(Error::InvariantViolation(format!(
            "transfer {} -> {} does not conserve the pair total",
            from.id, to.id
        )));
    }
    Ok(())
}

/// A pending record that is always finalized
///
/// If the transfer unwinds before [`PendingRecord::finish`] runs, `Drop`
/// appends the record as `failed`, or `rolled_back` once a write has
/// already reached the store.
struct PendingRecord<'a> {
    log: &'a TransactionLog,
    record: Option<TransactionRecord>,
    applied: usize,
}

impl<'a> PendingRecord<'a> {
    fn new(log: &'a TransactionLog, record: TransactionRecord) -> Self {
        Self {
            log,
            record: Some(record),
            applied: 0,
        }
    }

    fn id(&self) -> String {
        self.record
            .as_ref()
            .map(|r| r.id.to_string())
            .unwrap_or_default()
    }

    fn finish(&mut self, status: TransactionStatus, error: Option<String>) -> Result<TransactionRecord> {
        let record = self
            .record
            .take()
            .ok_or_else(|| Error::InvariantViolation("transaction record finalized twice".into()))?
            .finalize(status, error);
        self.log.append(record.clone())?;
        Ok(record)
    }
}

impl Drop for PendingRecord<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            let status = if self.applied > 0 {
                TransactionStatus::RolledBack
            } else {
                TransactionStatus::Failed
            };
            let record = record.finalize(status, Some("transfer abandoned".to_string()));
            tracing::warn!(
                id = %record.id,
                status = %status,
                applied_writes = self.applied,
                "Transfer abandoned before completion"
            );
            if let Err(e) = self.log.append(record) {
                tracing::error!(error = %e, "Failed to record abandoned transfer");
            }
        }
    }
}
