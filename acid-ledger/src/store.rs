//! Ledger store: the authoritative account table
//!
//! The store is the only component that mutates balances. Every method runs
//! under one `parking_lot::RwLock`, so reads and writes on a single account
//! are always mutually exclusive and batch methods are atomic. Physical
//! corruption is therefore impossible; the logical anomalies the strategies
//! exist to control (lost updates, partial transfers) are still reachable by
//! composing several calls.
//!
//! # Versions
//!
//! The store owns version numbering: new accounts start at 0 and every
//! committed mutation stores `previous + 1`, whatever version the caller
//! passed in.
//!
//! # Staged writes
//!
//! A slot may carry one uncommitted delta installed by [`LedgerStore::stage`].
//! Committed readers ([`LedgerStore::get`]) never see it; physical readers
//! ([`LedgerStore::get_uncommitted`]) do. This is the read barrier the
//! isolation levels are emulated with; no storage engine backs it.

use crate::{
    error::{Error, Result},
    types::{Account, AccountId},
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Uncommitted delta plus the token of the guard that owns it
#[derive(Debug, Clone, Copy)]
struct Staged {
    delta: Decimal,
    token: u64,
}

#[derive(Debug, Clone)]
struct Slot {
    committed: Account,
    staged: Option<Staged>,
}

impl Slot {
    fn physical(&self) -> Account {
        match self.staged {
            Some(staged) => self.committed.with_balance(self.committed.balance + staged.delta),
            None => self.committed.clone(),
        }
    }

    fn owns_stage(&self, token: u64) -> bool {
        self.staged.map_or(false, |staged| staged.token == token)
    }

    fn commit_balance(&mut self, balance: Decimal) -> Account {
        self.committed.balance = balance;
        self.committed.version += 1;
        self.committed.clone()
    }
}

/// In-memory account table
#[derive(Debug, Default)]
pub struct LedgerStore {
    slots: RwLock<BTreeMap<AccountId, Slot>>,
    next_token: AtomicU64,
}

impl LedgerStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table; every account restarts at version 0
    ///
    /// Staged writes still outstanding lose their slot: their commit fails
    /// and their drop leaves the fresh table alone.
    pub fn reset(&self, accounts: impl IntoIterator<Item = Account>) {
        let fresh: BTreeMap<AccountId, Slot> = accounts
            .into_iter()
            .map(|account| {
                let committed = Account::new(account.id, account.balance);
                (committed.id.clone(), Slot { committed, staged: None })
            })
            .collect();

        *self.slots.write() = fresh;
    }

    /// Committed state of one account
    pub fn get(&self, id: &AccountId) -> Result<Account> {
        self.slots
            .read()
            .get(id)
            .map(|slot| slot.committed.clone())
            .ok_or_else(|| Error::AccountNotFound(id.clone()))
    }

    /// Latest physical state, staged delta included
    pub fn get_uncommitted(&self, id: &AccountId) -> Result<Account> {
        self.slots
            .read()
            .get(id)
            .map(Slot::physical)
            .ok_or_else(|| Error::AccountNotFound(id.clone()))
    }

    /// Unconditional overwrite of one account's balance
    pub fn put(&self, account: &Account) -> Result<Account> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(&account.id)
            .ok_or_else(|| Error::AccountNotFound(account.id.clone()))?;

        Ok(slot.commit_balance(account.balance))
    }

    /// Compare-and-swap on the version field
    ///
    /// Returns `Ok(false)` without mutating when the stored version differs
    /// from `expected_version`.
    pub fn put_if_version_matches(&self, account: &Account, expected_version: u64) -> Result<bool> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(&account.id)
            .ok_or_else(|| Error::AccountNotFound(account.id.clone()))?;

        if slot.committed.version != expected_version {
            return Ok(false);
        }
        slot.commit_balance(account.balance);
        Ok(true)
    }

    /// Overwrite several accounts atomically
    ///
    /// Either every account is written or, if one is missing, none is.
    pub fn put_all(&self, accounts: &[Account]) -> Result<Vec<Account>> {
        let mut slots = self.slots.write();
        if let Some(missing) = accounts.iter().find(|a| !slots.contains_key(&a.id)) {
            return Err(Error::AccountNotFound(missing.id.clone()));
        }

        Ok(accounts
            .iter()
            .filter_map(|a| slots.get_mut(&a.id).map(|slot| slot.commit_balance(a.balance)))
            .collect())
    }

    /// Overwrite several accounts atomically if every stored version still
    /// equals the version carried by the corresponding argument
    ///
    /// The first mismatch is reported as [`Error::Conflict`] and nothing is
    /// written.
    pub fn put_all_if_versions_match(&self, accounts: &[Account]) -> Result<Vec<Account>> {
        let mut slots = self.slots.write();
        for account in accounts {
            let slot = slots
                .get(&account.id)
                .ok_or_else(|| Error::AccountNotFound(account.id.clone()))?;
            if slot.committed.version != account.version {
                return Err(Error::Conflict {
                    account: account.id.clone(),
                    expected: account.version,
                    actual: slot.committed.version,
                });
            }
        }

        Ok(accounts
            .iter()
            .filter_map(|a| slots.get_mut(&a.id).map(|slot| slot.commit_balance(a.balance)))
            .collect())
    }

    /// Add a new account at version 0
    pub fn insert(&self, account: Account) -> Result<Account> {
        let mut slots = self.slots.write();
        if slots.contains_key(&account.id) {
            return Err(Error::DuplicateAccount(account.id));
        }

        let committed = Account::new(account.id, account.balance);
        slots.insert(
            committed.id.clone(),
            Slot {
                committed: committed.clone(),
                staged: None,
            },
        );
        Ok(committed)
    }

    /// Atomic read-modify-write by `delta`; refuses to go negative
    pub fn adjust(&self, id: &AccountId, delta: Decimal) -> Result<Account> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| Error::AccountNotFound(id.clone()))?;

        let balance = slot.committed.balance + delta;
        if balance < Decimal::ZERO {
            return Err(Error::InsufficientFunds {
                account: id.clone(),
                balance: slot.committed.balance,
                requested: -delta,
            });
        }
        Ok(slot.commit_balance(balance))
    }

    /// Install an uncommitted delta on one account
    ///
    /// The returned guard commits with [`StagedWrite::commit`]; dropping it
    /// discards the delta.
    pub fn stage(&self, id: &AccountId, delta: Decimal) -> Result<StagedWrite<'_>> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| Error::AccountNotFound(id.clone()))?;

        if slot.staged.is_some() {
            return Err(Error::DirtyWriteInProgress(id.clone()));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        slot.staged = Some(Staged { delta, token });

        tracing::debug!(account = %id, delta = %delta, "Uncommitted write staged");

        Ok(StagedWrite {
            store: self,
            id: id.clone(),
            delta,
            token,
            finished: false,
        })
    }

    /// Check if an account carries an uncommitted delta
    pub fn has_staged(&self, id: &AccountId) -> bool {
        self.slots
            .read()
            .get(id)
            .map_or(false, |slot| slot.staged.is_some())
    }

    fn clear_staged(&self, id: &AccountId, token: u64) {
        if let Some(slot) = self.slots.write().get_mut(id) {
            if slot.owns_stage(token) {
                slot.staged = None;
            }
        }
    }

    /// Ordered snapshot of committed accounts
    pub fn all(&self) -> Vec<Account> {
        self.slots
            .read()
            .values()
            .map(|slot| slot.committed.clone())
            .collect()
    }

    /// Ordered snapshot of physical accounts, staged deltas included
    pub fn all_uncommitted(&self) -> Vec<Account> {
        self.slots.read().values().map(Slot::physical).collect()
    }

    /// Consistent keyed copy of all committed accounts
    pub fn snapshot(&self) -> BTreeMap<AccountId, Account> {
        self.slots
            .read()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.committed.clone()))
            .collect()
    }

    /// Number of accounts
    pub fn count(&self) -> usize {
        self.slots.read().len()
    }

    /// Sum of committed balances
    pub fn total(&self) -> Decimal {
        self.slots
            .read()
            .values()
            .map(|slot| slot.committed.balance)
            .sum()
    }

    /// Sum of physical balances, staged deltas included
    pub fn total_uncommitted(&self) -> Decimal {
        self.slots
            .read()
            .values()
            .map(|slot| slot.physical().balance)
            .sum()
    }
}

/// Uncommitted write guard returned by [`LedgerStore::stage`]
#[derive(Debug)]
#[must_use = "dropping a staged write discards it"]
pub struct StagedWrite<'a> {
    store: &'a LedgerStore,
    id: AccountId,
    delta: Decimal,
    token: u64,
    finished: bool,
}

impl StagedWrite<'_> {
    /// Account the write targets
    pub fn account(&self) -> &AccountId {
        &self.id
    }

    /// Staged delta
    pub fn delta(&self) -> Decimal {
        self.delta
    }

    /// Make the delta durable in committed state (version bumps)
    pub fn commit(mut self) -> Result<Account> {
        self.finished = true;
        let mut slots = self.store.slots.write();
        let slot = slots
            .get_mut(&self.id)
            .ok_or_else(|| Error::AccountNotFound(self.id.clone()))?;

        if !slot.owns_stage(self.token) {
            return Err(Error::Cancelled(format!(
                "staged write on {} discarded by ledger reset",
                self.id
            )));
        }
        slot.staged = None;
        let balance = slot.committed.balance + self.delta;
        if balance < Decimal::ZERO {
            return Err(Error::InsufficientFunds {
                account: self.id.clone(),
                balance: slot.committed.balance,
                requested: -self.delta,
            });
        }
        let committed = slot.commit_balance(balance);

        tracing::debug!(account = %self.id, balance = %committed.balance, "Staged write committed");
        Ok(committed)
    }

    /// Throw the delta away
    pub fn rollback(mut self) {
        self.finished = true;
        self.store.clear_staged(&self.id, self.token);
        tracing::debug!(account = %self.id, "Staged write rolled back");
    }
}

impl Drop for StagedWrite<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.clear_staged(&self.id, self.token);
            tracing::debug!(account = %self.id, "Staged write discarded");
        }
    }
}
