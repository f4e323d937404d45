//! Isolation-level emulation
//!
//! Isolation levels are simulated as read barriers over the ledger store;
//! no storage engine stands behind them. A [`ReadView`] is opened for one
//! logical multi-step read and decides what each read observes:
//!
//! | Level              | account read              | count / total         |
//! |--------------------|---------------------------|-----------------------|
//! | `read-uncommitted` | physical, staged included | physical, live        |
//! | `read-committed`   | committed, live           | committed, live       |
//! | `repeatable-read`  | committed, pinned at 1st  | committed, live       |
//! | `serializable`     | snapshot at begin         | snapshot at begin     |
//!
//! Backing the ledger with a real database would replace these views with
//! the engine's own guarantees, which may differ in detail.

use crate::{
    error::{Error, Result},
    store::LedgerStore,
    types::{Account, AccountId, IsolationLevel},
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Reads of one logical operation under an isolation level
#[derive(Debug)]
pub struct ReadView<'a> {
    store: &'a LedgerStore,
    level: IsolationLevel,
    pinned: HashMap<AccountId, Account>,
    snapshot: Option<BTreeMap<AccountId, Account>>,
}

impl<'a> ReadView<'a> {
    /// Open a view; `serializable` takes its snapshot here
    pub fn begin(store: &'a LedgerStore, level: IsolationLevel) -> Self {
        let snapshot = match level {
            IsolationLevel::Serializable => Some(store.snapshot()),
            _ => None,
        };

        Self {
            store,
            level,
            pinned: HashMap::new(),
            snapshot,
        }
    }

    /// Read one account
    pub fn read(&mut self, id: &AccountId) -> Result<Account> {
        match self.level {
            IsolationLevel::ReadUncommitted => self.store.get_uncommitted(id),
            IsolationLevel::ReadCommitted => self.store.get(id),
            IsolationLevel::RepeatableRead => {
                if let Some(account) = self.pinned.get(id) {
                    return Ok(account.clone());
                }
                let account = self.store.get(id)?;
                self.pinned.insert(id.clone(), account.clone());
                Ok(account)
            }
            IsolationLevel::Serializable => self
                .snapshot
                .as_ref()
                .and_then(|s| s.get(id).cloned())
                .ok_or_else(|| Error::AccountNotFound(id.clone())),
        }
    }

    /// Number of accounts
    pub fn count(&self) -> usize {
        match &self.snapshot {
            Some(snapshot) => snapshot.len(),
            None => self.store.count(),
        }
    }

    /// Sum of balances
    pub fn total(&self) -> Decimal {
        match (&self.snapshot, self.level) {
            (Some(snapshot), _) => snapshot.values().map(|a| a.balance).sum(),
            (None, IsolationLevel::ReadUncommitted) => self.store.total_uncommitted(),
            (None, _) => self.store.total(),
        }
    }

    /// All accounts, ordered by id
    pub fn accounts(&self) -> Vec<Account> {
        match (&self.snapshot, self.level) {
            (Some(snapshot), _) => snapshot.values().cloned().collect(),
            (None, IsolationLevel::ReadUncommitted) => self.store.all_uncommitted(),
            (None, _) => self.store.all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_read_uncommitted_sees_staged() {
        let store = seeded();
        let mut view = ReadView::begin(&store, IsolationLevel::ReadUncommitted);
        let _staged = store.stage(&acc1(), dec!(-300)).unwrap();

        assert_eq!(view.read(&acc1()).unwrap().balance, dec!(700.00));
        assert_eq!(view.total(), dec!(1200.00));
    }

    #[test]
    fn test_read_committed_ignores_staged_but_sees_commits() {
        let store = seeded();
        let mut view = ReadView::begin(&store, IsolationLevel::ReadCommitted);
        let staged = store.stage(&acc1(), dec!(-300)).unwrap();

        assert_eq!(view.read(&acc1()).unwrap().balance, dec!(1000.00));
        staged.commit().unwrap();
        assert_eq!(view.read(&acc1()).unwrap().balance, dec!(700.00));
    }

    #[test]
    fn test_repeatable_read_pins_rows_not_count() {
        let store = seeded();
        let mut view = ReadView::begin(&store, IsolationLevel::RepeatableRead);

        let first = view.read(&acc1()).unwrap();
        let before = view.count();
        store.adjust(&acc1(), dec!(50)).unwrap();
        store.insert(Account::new("ACC009", dec!(1))).unwrap();

        assert_eq!(view.read(&acc1()).unwrap(), first);
        assert_eq!(view.count(), before + 1);
    }

    #[test]
    fn test_serializable_freezes_everything() {
        let store = seeded();
        let mut view = ReadView::begin(&store, IsolationLevel::Serializable);

        store.adjust(&acc1(), dec!(50)).unwrap();
        store.insert(Account::new("ACC009", dec!(1))).unwrap();

        assert_eq!(view.read(&acc1()).unwrap().balance, dec!(1000.00));
        assert_eq!(view.count(), 2);
        assert_eq!(view.total(), dec!(1500.00));
        assert_eq!(view.accounts().len(), 2);
        assert!(view.read(&AccountId::new("ACC009")).is_err());
    }
}
