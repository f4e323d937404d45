//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Money conservation: Σ(balances) unchanged by atomic-path transfers
//! - Non-negativity: no committed transfer leaves a negative balance
//! - One record per attempt, whatever the outcome
//! - Atomic-path faults leave the ledger untouched

use acid_ledger::{
    config::TransferConfig, types::Strategy as TransferStrategy, AccountId, Config, Ledger,
    TransactionStatus, TransferRequest,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

const ACCOUNTS: [&str; 4] = ["ACC001", "ACC002", "ACC003", "ACC004"];

/// Strategy for generating valid amounts (positive decimals)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..150_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy for generating strategies that preserve the total
fn atomic_strategy() -> impl Strategy<Value = TransferStrategy> {
    prop_oneof![
        Just(TransferStrategy::Atomic),
        Just(TransferStrategy::Optimistic),
        Just(TransferStrategy::Pessimistic),
    ]
}

/// Strategy for generating transfer requests over the seeded accounts
fn request_strategy() -> impl Strategy<Value = TransferRequest> {
    (
        0..ACCOUNTS.len(),
        0..ACCOUNTS.len(),
        amount_strategy(),
        atomic_strategy(),
        any::<bool>(),
    )
        .prop_map(|(from, to, amount, strategy, simulate_error)| {
            TransferRequest::new(ACCOUNTS[from], ACCOUNTS[to], amount, strategy)
                .with_simulated_error(simulate_error)
        })
}

/// Create test ledger with no artificial delays
fn create_test_ledger() -> Ledger {
    let mut config = Config::default();
    config.transfer = TransferConfig::immediate();

    let ledger = Ledger::new(config);
    ledger
        .init_accounts(vec![
            ("ACC001", Decimal::new(100000, 2)),
            ("ACC002", Decimal::new(50000, 2)),
            ("ACC003", Decimal::new(75000, 2)),
            ("ACC004", Decimal::ZERO),
        ])
        .unwrap();
    ledger
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Sequential atomic-path transfers conserve the total and never go negative
    #[test]
    fn prop_conservation_and_non_negativity(requests in prop::collection::vec(request_strategy(), 1..40)) {
        let ledger = create_test_ledger();
        let before = ledger.total_balance();

        for request in &requests {
            let _ = ledger.transfer(request);

            prop_assert_eq!(ledger.total_balance(), before);
            for account in ledger.list_accounts() {
                prop_assert!(account.balance >= Decimal::ZERO);
            }
        }

        prop_assert!(ledger.verify_conservation().is_ok());
    }

    /// Property: Exactly one terminal record per attempt
    #[test]
    fn prop_one_record_per_attempt(requests in prop::collection::vec(request_strategy(), 1..40)) {
        let ledger = create_test_ledger();

        for request in &requests {
            let _ = ledger.transfer(request);
        }

        let records = ledger.list_transactions();
        prop_assert_eq!(records.len(), requests.len());
        prop_assert!(records.iter().all(|r| r.status.is_terminal()));

        // Atomic paths never report a partial mutation
        prop_assert!(records.iter().all(|r| r.status != TransactionStatus::RolledBack));

        let summary = ledger.transaction_summary();
        prop_assert_eq!(summary.success + summary.failed, requests.len());
    }

    /// Property: A transfer commits iff it is valid, funded and not faulted
    #[test]
    fn prop_success_iff_valid_and_funded(request in request_strategy()) {
        let ledger = create_test_ledger();
        let from = ledger.account(&request.from).unwrap();
        let to_before = ledger.account(&request.to).unwrap();

        let result = ledger.transfer(&request);
        let should_commit = request.from != request.to
            && from.balance >= request.amount
            && !request.simulate_error;

        prop_assert_eq!(result.is_ok(), should_commit);
        if should_commit {
            prop_assert_eq!(ledger.account(&request.from).unwrap().balance, from.balance - request.amount);
            prop_assert_eq!(ledger.account(&request.to).unwrap().balance, to_before.balance + request.amount);
        } else {
            prop_assert_eq!(ledger.account(&request.from).unwrap().balance, from.balance);
        }
    }

    /// Property: The uncontrolled fault loses exactly the amount
    #[test]
    fn prop_uncontrolled_fault_drift(amount in amount_strategy()) {
        let ledger = create_test_ledger();
        let request = TransferRequest::new("ACC001", "ACC002", amount, TransferStrategy::Uncontrolled)
            .with_simulated_error(true);

        prop_assert!(ledger.transfer(&request).is_err());
        if amount <= Decimal::new(100000, 2) {
            prop_assert_eq!(ledger.conservation_drift(), -amount);
            prop_assert_eq!(ledger.list_transactions()[0].status, TransactionStatus::RolledBack);
        } else {
            prop_assert!(ledger.conservation_drift().is_zero());
            prop_assert_eq!(ledger.list_transactions()[0].status, TransactionStatus::Failed);
        }
        prop_assert_eq!(
            ledger.account(&AccountId::new("ACC002")).unwrap().balance,
            Decimal::new(50000, 2)
        );
    }
}
