//! Isolation probe
//!
//! Runs the multi-step read `read#1 → W1 → read#2 → count → W2 → count`
//! through a [`ReadView`] and reports what it saw. The waits are where a
//! concurrent actor gets to mutate the ledger; a [`Pacer`] decides what
//! happens there. [`SleepPacer`] blocks for configured durations,
//! [`FnPacer`] runs a callback (handy for deterministic tests).

use crate::{
    context::OpContext,
    error::{Error, Result},
    isolation::ReadView,
    store::LedgerStore,
    types::{AccountId, IsolationLevel},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Injection point inside a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    /// W1, between the two account reads
    BetweenReads,
    /// W2, between the two aggregate reads
    BetweenCounts,
}

/// Decides what happens at each probe wait
pub trait Pacer {
    /// Block (or act) at `phase`
    fn pause(&self, phase: ProbePhase, ctx: &OpContext) -> Result<()>;
}

/// Real blocking waits
#[derive(Debug, Clone, Copy)]
pub struct SleepPacer {
    /// W1
    pub between_reads: Duration,
    /// W2
    pub between_counts: Duration,
}

impl Pacer for SleepPacer {
    fn pause(&self, phase: ProbePhase, ctx: &OpContext) -> Result<()> {
        let wait = match phase {
            ProbePhase::BetweenReads => self.between_reads,
            ProbePhase::BetweenCounts => self.between_counts,
        };
        ctx.sleep(wait, "isolation probe wait")
    }
}

/// Pacer backed by a callback
pub struct FnPacer<F>(pub F);

impl<F> std::fmt::Debug for FnPacer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnPacer")
    }
}

impl<F> Pacer for FnPacer<F>
where
    F: Fn(ProbePhase),
{
    fn pause(&self, phase: ProbePhase, ctx: &OpContext) -> Result<()> {
        ctx.check("isolation probe wait")?;
        (self.0)(phase);
        Ok(())
    }
}

/// What one probe observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Probed account
    pub account: AccountId,
    /// Level the probe ran under
    pub level: IsolationLevel,
    /// Balance at read#1
    pub read1: Decimal,
    /// Balance at read#2
    pub read2: Decimal,
    /// Account count before W2
    pub count_before: usize,
    /// Account count after W2
    pub count_after: usize,
    /// Sum of balances before W2
    pub total_before: Decimal,
    /// Sum of balances after W2
    pub total_after: Decimal,
}

impl ProbeResult {
    /// Non-repeatable (or dirty) read observed
    pub fn balance_changed(&self) -> bool {
        self.read1 != self.read2
    }

    /// Phantom observed in the account count
    pub fn phantom_observed(&self) -> bool {
        self.count_before != self.count_after
    }

    /// Aggregate sum moved between the two aggregate reads
    pub fn total_changed(&self) -> bool {
        self.total_before != self.total_after
    }
}

/// Multi-step reader over the store
#[derive(Debug, Clone, Copy)]
pub struct IsolationProbe<'a> {
    store: &'a LedgerStore,
}

impl<'a> IsolationProbe<'a> {
    /// Probe over `store`
    pub fn new(store: &'a LedgerStore) -> Self {
        Self { store }
    }

    /// Run the probe; performs no mutation itself
    pub fn observe(
        &self,
        account: &AccountId,
        level: IsolationLevel,
        pacer: &dyn Pacer,
        ctx: &OpContext,
    ) -> Result<ProbeResult> {
        let mut view = ReadView::begin(self.store, level);

        let read1 = view.read(account)?.balance;
        tracing::info!(account = %account, level = %level, balance = %read1, "First read");

        pacer.pause(ProbePhase::BetweenReads, ctx)?;

        let read2 = view.read(account)?.balance;
        let count_before = view.count();
        let total_before = view.total();
        tracing::info!(
            account = %account,
            level = %level,
            balance = %read2,
            changed = read1 != read2,
            accounts = count_before,
            "Second read"
        );

        pacer.pause(ProbePhase::BetweenCounts, ctx)?;

        let count_after = view.count();
        let total_after = view.total();

        let result = ProbeResult {
            account: account.clone(),
            level,
            read1,
            read2,
            count_before,
            count_after,
            total_before,
            total_after,
        };

        let stable_rows = matches!(
            level,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        );
        let stable_aggregates = level == IsolationLevel::Serializable;
        if (stable_rows && result.balance_changed())
            || (stable_aggregates && (result.phantom_observed() || result.total_changed()))
        {
            tracing::error!(result = ?result, "Isolation guarantee broken");
            return Err(Error::InvariantViolation(format!(
                "{} probe on {} observed a change",
                level, account
            )));
        }

        tracing::info!(
            account = %account,
            level = %level,
            balance_changed = result.balance_changed(),
            phantom = result.phantom_observed(),
            accounts_before = count_before,
            accounts_after = count_after,
            "Isolation probe finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Account;
    use rust_decimal_macros::dec;

    fn seeded() -> LedgerStore {
        let store = LedgerStore::new();
        store.reset(vec![
            Account::new("ACC001", dec!(1000.00)),
            Account::new("ACC002", dec!(500.00)),
        ]);
        store
    }

    fn acc1() -> AccountId {
        AccountId::new("ACC001")
    }

    /// Commits +100 on ACC001 during W1 and opens a new account during W2
    fn run(level: IsolationLevel) -> ProbeResult {
        let store = seeded();
        let pacer = FnPacer(|phase| match phase {
            ProbePhase::BetweenReads => {
                store.adjust(&acc1(), dec!(100)).unwrap();
            }
            ProbePhase::BetweenCounts => {
                store.insert(Account::new("ACC003", dec!(750.00))).unwrap();
            }
        });

        IsolationProbe::new(&store)
            .observe(&acc1(), level, &pacer, &OpContext::background())
            .unwrap()
    }

    #[test]
    fn test_read_committed_non_repeatable() {
        let result = run(IsolationLevel::ReadCommitted);
        assert!(result.balance_changed());
        assert_eq!(result.read2, dec!(1100.00));
        assert!(result.phantom_observed());
    }

    #[test]
    fn test_repeatable_read_stable_with_phantom() {
        let result = run(IsolationLevel::RepeatableRead);
        assert_eq!(result.read1, result.read2);
        assert_eq!(result.count_before, 2);
        assert_eq!(result.count_after, 3);
    }

    #[test]
    fn test_serializable_fully_stable() {
        let result = run(IsolationLevel::Serializable);
        assert!(!result.balance_changed());
        assert!(!result.phantom_observed());
        assert!(!result.total_changed());
        assert_eq!(result.total_before, dec!(1500.00));
    }

    #[test]
    fn test_read_uncommitted_sees_dirty_write() {
        let store = seeded();
        let pacer = FnPacer(|phase| {
            if phase == ProbePhase::BetweenReads {
                // Staged and left in place until the probe returns
                std::mem::forget(store.stage(&acc1(), dec!(-250)).unwrap());
            }
        });

        let dirty = IsolationProbe::new(&store)
            .observe(&acc1(), IsolationLevel::ReadUncommitted, &pacer, &OpContext::background())
            .unwrap();
        assert_eq!(dirty.read1, dec!(1000.00));
        assert_eq!(dirty.read2, dec!(750.00));
    }

    #[test]
    fn test_sleep_pacer_respects_deadline() {
        let store = seeded();
        let pacer = SleepPacer {
            between_reads: Duration::from_secs(10),
            between_counts: Duration::from_secs(10),
        };
        let ctx = OpContext::with_timeout(Duration::from_millis(20));

        let err = IsolationProbe::new(&store)
            .observe(&acc1(), IsolationLevel::ReadCommitted, &pacer, &ctx)
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
    }

    #[test]
    fn test_missing_account() {
        let store = seeded();
        let pacer = FnPacer(|_| {});
        assert!(matches!(
            IsolationProbe::new(&store).observe(
                &AccountId::new("ACC404"),
                IsolationLevel::Serializable,
                &pacer,
                &OpContext::background()
            ),
            Err(Error::AccountNotFound(_))
        ));
    }
}
