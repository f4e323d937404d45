//! Concurrency demonstrations
//!
//! Canned races that make each strategy's behaviour visible: two opposing
//! transfers on one account pair, and an isolation probe with a competing
//! writer. Everything runs on scoped OS threads against one [`Ledger`].

use crate::{
    context::OpContext,
    error::Result,
    ledger::Ledger,
    probe::ProbeResult,
    types::{Account, AccountId, IsolationLevel, Strategy, TransferOutcome, TransferRequest},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Stagger before the second pessimistic leg, so the first one wins the locks
pub const PESSIMISTIC_STAGGER: Duration = Duration::from_millis(50);

/// Result of two concurrent transfers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceReport {
    /// Strategy of the first leg
    pub strategy: Strategy,
    /// First leg
    pub first: TransferOutcome,
    /// Second leg
    pub second: TransferOutcome,
    /// Wall-clock time for both legs
    pub elapsed_ms: u64,
    /// Accounts after both legs finished
    pub balances: Vec<Account>,
    /// Ledger total minus expected total
    pub drift: Decimal,
}

impl RaceReport {
    /// Number of legs that committed
    pub fn successes(&self) -> usize {
        [&self.first, &self.second]
            .iter()
            .filter(|o| o.is_success())
            .count()
    }
}

/// Run two transfers concurrently, the second after `stagger`
pub fn race(
    ledger: &Ledger,
    first: &TransferRequest,
    second: &TransferRequest,
    stagger: Duration,
) -> RaceReport {
    let started = Instant::now();

    let (first_result, second_result) = std::thread::scope(|s| {
        let a = s.spawn(|| ledger.transfer(first));
        let b = s.spawn(|| {
            if !stagger.is_zero() {
                std::thread::sleep(stagger);
            }
            ledger.transfer(second)
        });
        (join(a), join(b))
    });

    let report = RaceReport {
        strategy: first.strategy,
        first: TransferOutcome::from(&first_result),
        second: TransferOutcome::from(&second_result),
        elapsed_ms: started.elapsed().as_millis() as u64,
        balances: ledger.list_accounts(),
        drift: ledger.conservation_drift(),
    };

    tracing::info!(
        strategy = %report.strategy,
        first = %report.first.status,
        second = %report.second.status,
        elapsed_ms = report.elapsed_ms,
        drift = %report.drift,
        "Race finished"
    );

    report
}

fn join<T>(handle: std::thread::ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(crate::Error::Other("transfer thread panicked".to_string())))
}

/// A->B `amount` against B->A `amount / 2` under `strategy`, started together
pub fn opposing_race(
    ledger: &Ledger,
    strategy: Strategy,
    a: &AccountId,
    b: &AccountId,
    amount: Decimal,
    stagger: Duration,
) -> RaceReport {
    let forward = TransferRequest::new(a.clone(), b.clone(), amount, strategy);
    let backward = TransferRequest::new(b.clone(), a.clone(), amount / Decimal::TWO, strategy);
    race(ledger, &forward, &backward, stagger)
}

/// Two optimistic transfers that read before either commits; one conflicts
pub fn optimistic_race(ledger: &Ledger, a: &AccountId, b: &AccountId, amount: Decimal) -> RaceReport {
    opposing_race(ledger, Strategy::Optimistic, a, b, amount, Duration::ZERO)
}

/// Two pessimistic transfers on the same pair; they serialize on the locks
pub fn pessimistic_race(ledger: &Ledger, a: &AccountId, b: &AccountId, amount: Decimal) -> RaceReport {
    opposing_race(ledger, Strategy::Pessimistic, a, b, amount, PESSIMISTIC_STAGGER)
}

/// Probe `account` while another thread commits `delta` after `mutate_after`
pub fn probe_with_mutator(
    ledger: &Ledger,
    account: &AccountId,
    level: IsolationLevel,
    mutate_after: Duration,
    delta: Decimal,
) -> Result<ProbeResult> {
    std::thread::scope(|s| {
        let mutator = s.spawn(|| {
            std::thread::sleep(mutate_after);
            ledger.mutate_balance(account, delta)
        });
        let result = ledger.observe_isolation(account, level);

        if let Err(e) = join(mutator) {
            tracing::warn!(account = %account, error = %e, "Concurrent mutation failed");
        }
        result
    })
}

/// Probe under `read-uncommitted` while a long-running update holds a dirty write
pub fn dirty_read(
    ledger: &Ledger,
    account: &AccountId,
    stage_after: Duration,
    delta: Decimal,
) -> Result<ProbeResult> {
    std::thread::scope(|s| {
        let writer = s.spawn(|| {
            std::thread::sleep(stage_after);
            ledger.long_running_update(account, delta, &OpContext::background())
        });
        let result = ledger.observe_isolation(account, IsolationLevel::ReadUncommitted);

        if let Err(e) = join(writer) {
            tracing::warn!(account = %account, error = %e, "Long-running update failed");
        }
        result
    })
}
