//! End-to-end ledger behaviour under concurrency

use acid_ledger::{
    config::TransferConfig, scenarios, AccountId, CancelToken, Config, Error, FnPacer,
    IsolationLevel, Ledger, OpContext, ProbePhase, Strategy, TransactionStatus, TransferRequest,
};
use rust_decimal_macros::dec;
use std::sync::Barrier;
use std::time::{Duration, Instant};

fn ledger_with(transfer: TransferConfig) -> Ledger {
    let mut config = Config::default();
    config.transfer = transfer;
    let ledger = Ledger::new(config);
    ledger
        .init_accounts(vec![("ACC001", dec!(1000.00)), ("ACC002", dec!(500.00))])
        .unwrap();
    ledger
}

fn acc(id: &str) -> AccountId {
    AccountId::new(id)
}

#[test]
fn test_atomic_transfer_example() {
    let ledger = ledger_with(TransferConfig::immediate());

    let record = ledger
        .transfer(&TransferRequest::new("ACC001", "ACC002", dec!(200), Strategy::Atomic))
        .unwrap();

    assert_eq!(record.status, TransactionStatus::Success);
    assert_eq!(ledger.account(&acc("ACC001")).unwrap().balance, dec!(800.00));
    assert_eq!(ledger.account(&acc("ACC002")).unwrap().balance, dec!(700.00));
    assert_eq!(ledger.total_balance(), dec!(1500.00));
    assert_eq!(ledger.list_transactions().len(), 1);
    ledger.verify_conservation().unwrap();
}

#[test]
fn test_uncontrolled_fault_example() {
    let ledger = ledger_with(TransferConfig::immediate());
    let request = TransferRequest::new("ACC001", "ACC002", dec!(200), Strategy::Uncontrolled)
        .with_simulated_error(true);

    let err = ledger.transfer(&request).unwrap_err();
    assert!(matches!(err, Error::InjectedFault(_)));

    assert_eq!(ledger.account(&acc("ACC001")).unwrap().balance, dec!(800.00));
    assert_eq!(ledger.account(&acc("ACC002")).unwrap().balance, dec!(500.00));
    assert_eq!(ledger.conservation_drift(), dec!(-200));

    let records = ledger.list_transactions();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransactionStatus::RolledBack);
    assert!(records[0].error.is_some());
}

#[test]
fn test_versions_increment_per_commit() {
    let ledger = ledger_with(TransferConfig::immediate());
    for strategy in [Strategy::Atomic, Strategy::Optimistic, Strategy::Pessimistic] {
        ledger
            .transfer(&TransferRequest::new("ACC001", "ACC002", dec!(1), strategy))
            .unwrap();
    }
    assert_eq!(ledger.account(&acc("ACC001")).unwrap().version, 3);
    assert_eq!(ledger.account(&acc("ACC002")).unwrap().version, 3);
}

#[test]
fn test_optimistic_conflict_exactly_one_winner() {
    let ledger = ledger_with(TransferConfig {
        optimistic_think_time_ms: 150,
        ..TransferConfig::immediate()
    });

    let report = scenarios::optimistic_race(&ledger, &acc("ACC001"), &acc("ACC002"), dec!(200));
    assert_eq!(report.successes(), 1);

    // Final state is the winner applied alone
    let a = ledger.account(&acc("ACC001")).unwrap().balance;
    let b = ledger.account(&acc("ACC002")).unwrap().balance;
    if report.first.is_success() {
        assert_eq!((a, b), (dec!(800.00), dec!(700.00)));
    } else {
        assert_eq!((a, b), (dec!(1100.00), dec!(400.00)));
    }
    ledger.verify_conservation().unwrap();
    assert_eq!(ledger.transaction_summary().failed, 1);
}

#[test]
fn test_pessimistic_windows_do_not_overlap() {
    let hold = Duration::from_millis(120);
    let ledger = ledger_with(TransferConfig {
        pessimistic_hold_ms: hold.as_millis() as u64,
        ..TransferConfig::immediate()
    });
    let barrier = Barrier::new(2);

    let started = Instant::now();
    std::thread::scope(|s| {
        for (from, to) in [("ACC001", "ACC002"), ("ACC002", "ACC001")] {
            let ledger = &ledger;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                ledger
                    .transfer(&TransferRequest::new(from, to, dec!(100), Strategy::Pessimistic))
                    .unwrap();
            });
        }
    });

    assert!(started.elapsed() >= hold * 2);
    assert_eq!(ledger.account(&acc("ACC001")).unwrap().balance, dec!(1000.00));
    ledger.verify_conservation().unwrap();
}

#[test]
fn test_uncontrolled_race_can_lose_updates() {
    let ledger = ledger_with(TransferConfig::immediate());
    let barrier = Barrier::new(8);

    std::thread::scope(|s| {
        for _ in 0..8 {
            let ledger = &ledger;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for _ in 0..25 {
                    let _ = ledger.transfer(&TransferRequest::new(
                        "ACC001",
                        "ACC002",
                        dec!(1),
                        Strategy::Uncontrolled,
                    ));
                }
            });
        }
    });

    // Lost updates may or may not happen; balances are never torn
    assert_eq!(ledger.list_transactions().len(), 200);
    for account in ledger.list_accounts() {
        assert!(account.balance >= dec!(0));
    }
}

/// Threads transfer around ACC001 -> ACC002 -> ACC003 -> ACC001
fn run_cycle(ledger: &Ledger, strategy_for: impl Fn(usize) -> Strategy + Sync) {
    const CYCLE: [(&str, &str); 3] = [("ACC001", "ACC002"), ("ACC002", "ACC003"), ("ACC003", "ACC001")];
    let barrier = Barrier::new(6);

    std::thread::scope(|s| {
        for i in 0..6 {
            let barrier = &barrier;
            let strategy_for = &strategy_for;
            s.spawn(move || {
                barrier.wait();
                let (from, to) = CYCLE[i % CYCLE.len()];
                for _ in 0..50 {
                    let _ = ledger.transfer(&TransferRequest::new(from, to, dec!(7), strategy_for(i)));
                }
            });
        }
    });
}

#[test]
fn test_concurrent_guarded_strategies_conserve() {
    for strategy in [Strategy::Atomic, Strategy::Optimistic, Strategy::Pessimistic] {
        let ledger = ledger_with(TransferConfig::immediate());
        ledger.open_account("ACC003", dec!(750.00)).unwrap();

        run_cycle(&ledger, |_| strategy);

        assert_eq!(ledger.total_balance(), dec!(2250.00), "{} lost money", strategy);
        ledger.verify_conservation().unwrap();
        assert_eq!(ledger.list_transactions().len(), 300);
        assert!(ledger.list_accounts().iter().all(|a| a.balance >= dec!(0)));
    }
}

#[test]
fn test_mixed_guarded_strategies_conserve() {
    const MIX: [Strategy; 3] = [Strategy::Atomic, Strategy::Optimistic, Strategy::Pessimistic];
    let ledger = ledger_with(TransferConfig::immediate());
    ledger.open_account("ACC003", dec!(750.00)).unwrap();

    run_cycle(&ledger, |i| MIX[(i / 3 + i) % MIX.len()]);

    assert_eq!(ledger.total_balance(), dec!(2250.00));
    ledger.verify_conservation().unwrap();
    let summary = ledger.transaction_summary();
    assert_eq!(summary.success + summary.failed, 300);
    assert_eq!(summary.rolled_back, 0);
}

#[test]
fn test_repeatable_read_stable_under_mutation() {
    let ledger = ledger_with(TransferConfig::immediate());
    let pacer = FnPacer(|phase| match phase {
        ProbePhase::BetweenReads => {
            ledger.mutate_balance(&acc("ACC001"), dec!(100)).unwrap();
        }
        ProbePhase::BetweenCounts => {
            ledger.open_account("ACC003", dec!(750.00)).unwrap();
        }
    });

    let result = ledger
        .observe_isolation_with(&acc("ACC001"), IsolationLevel::RepeatableRead, &pacer, &OpContext::background())
        .unwrap();

    assert_eq!(result.read1, result.read2);
    assert!(result.phantom_observed());
    assert_eq!(ledger.account(&acc("ACC001")).unwrap().balance, dec!(1100.00));
}

#[test]
fn test_read_committed_sees_concurrent_commit() {
    let ledger = ledger_with(TransferConfig::immediate());
    let pacer = FnPacer(|phase| {
        if phase == ProbePhase::BetweenReads {
            ledger
                .transfer(&TransferRequest::new("ACC001", "ACC002", dec!(300), Strategy::Atomic))
                .unwrap();
        }
    });

    let result = ledger
        .observe_isolation_with(&acc("ACC001"), IsolationLevel::ReadCommitted, &pacer, &OpContext::background())
        .unwrap();
    assert_eq!(result.read1, dec!(1000.00));
    assert_eq!(result.read2, dec!(700.00));
}

#[test]
fn test_serializable_ignores_everything() {
    let ledger = ledger_with(TransferConfig::immediate());
    let pacer = FnPacer(|phase| match phase {
        ProbePhase::BetweenReads => {
            ledger.mutate_balance(&acc("ACC001"), dec!(-400)).unwrap();
        }
        ProbePhase::BetweenCounts => {
            ledger.open_account("ACC003", dec!(1)).unwrap();
        }
    });

    let result = ledger
        .observe_isolation_with(&acc("ACC001"), IsolationLevel::Serializable, &pacer, &OpContext::background())
        .unwrap();
    assert!(!result.balance_changed());
    assert!(!result.phantom_observed());
    assert_eq!(result.total_before, dec!(1500.00));
}

#[test]
fn test_read_uncommitted_sees_dirty_write() {
    let ledger = ledger_with(TransferConfig::immediate());
    let dirty = std::cell::RefCell::new(None);
    let pacer = FnPacer(|phase| {
        if phase == ProbePhase::BetweenReads {
            *dirty.borrow_mut() = Some(ledger.begin_dirty_write(&acc("ACC001"), dec!(-250)).unwrap());
        }
    });

    let result = ledger
        .observe_isolation_with(&acc("ACC001"), IsolationLevel::ReadUncommitted, &pacer, &OpContext::background())
        .unwrap();
    assert_eq!(result.read2, dec!(750.00));
    drop(pacer);

    // Rolled back: committed state never changed
    if let Some(write) = dirty.into_inner() {
        write.rollback();
    }
    assert_eq!(ledger.account(&acc("ACC001")).unwrap().balance, dec!(1000.00));
    ledger.verify_conservation().unwrap();
}

#[test]
fn test_cancellation_releases_locks_and_records_failure() {
    let ledger = ledger_with(TransferConfig {
        pessimistic_hold_ms: 10_000,
        ..TransferConfig::immediate()
    });
    let token = CancelToken::new();
    let ctx = OpContext::background().cancel_token(token.clone());

    let err = std::thread::scope(|s| {
        let handle = s.spawn(|| {
            ledger.transfer_with(
                &TransferRequest::new("ACC001", "ACC002", dec!(50), Strategy::Pessimistic),
                &ctx,
            )
        });
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
        handle.join().unwrap().unwrap_err()
    });
    assert!(matches!(err, Error::Cancelled(_)));

    // Locks are free again: a shared read gets through immediately
    let accounts = ledger
        .read_locked(&[acc("ACC001"), acc("ACC002")], &OpContext::with_timeout(Duration::from_millis(100)))
        .unwrap();
    assert_eq!(accounts[0].balance, dec!(1000.00));

    let records = ledger.list_transactions();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransactionStatus::Failed);
}

#[test]
fn test_lock_timeout() {
    let ledger = ledger_with(TransferConfig {
        pessimistic_hold_ms: 500,
        lock_timeout_ms: Some(50),
        ..TransferConfig::immediate()
    });

    let (first, second) = std::thread::scope(|s| {
        let first = s.spawn(|| {
            ledger.transfer(&TransferRequest::new("ACC001", "ACC002", dec!(10), Strategy::Pessimistic))
        });
        std::thread::sleep(Duration::from_millis(100));
        let second =
            ledger.transfer(&TransferRequest::new("ACC002", "ACC001", dec!(10), Strategy::Pessimistic));
        (first.join().unwrap(), second)
    });

    assert!(first.is_ok());
    let err = second.unwrap_err();
    assert!(matches!(err, Error::LockTimeout { .. }));
    assert!(err.is_transient());
    assert_eq!(ledger.transaction_summary().failed, 1);
}

#[test]
fn test_transactions_for_account() {
    let ledger = ledger_with(TransferConfig::immediate());
    ledger.open_account("ACC003", dec!(10)).unwrap();
    ledger
        .transfer(&TransferRequest::new("ACC001", "ACC002", dec!(1), Strategy::Atomic))
        .unwrap();
    ledger
        .transfer(&TransferRequest::new("ACC003", "ACC001", dec!(1), Strategy::Atomic))
        .unwrap();

    assert_eq!(ledger.transactions_for(&acc("ACC001")).len(), 2);
    let for_three = ledger.transactions_for(&acc("ACC003"));
    assert_eq!(for_three.len(), 1);
    assert_eq!(for_three[0].from, acc("ACC003"));

    // Newest first
    assert_eq!(ledger.list_transactions()[0].from, acc("ACC003"));
}
