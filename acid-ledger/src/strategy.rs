//! Concurrency-control strategies
//!
//! A strategy turns a set of account ids into an [`Access`] handle that the
//! transfer orchestrator drives through one read-modify-write:
//!
//! ```text
//! acquire(ids) ─▶ read(from), read(to) ─▶ write(debit), write(credit) ─▶ commit()
//!                                                                   └─▶ drop = release
//! ```
//!
//! | Strategy       | acquire                     | write               | commit                       |
//! |----------------|-----------------------------|---------------------|------------------------------|
//! | `uncontrolled` | nothing                     | applied immediately | nothing                      |
//! | `atomic`       | nothing, versions recorded  | buffered            | batch compare-and-swap       |
//! | `optimistic`   | nothing, versions recorded  | buffered            | batch compare-and-swap       |
//! | `pessimistic`  | exclusive locks, id order   | buffered            | batch compare-and-swap       |
//!
//! Pessimistic commits never conflict among themselves; the version check
//! only fires when an `atomic` or `optimistic` writer committed under them.
//!
//! Release is the handle's `Drop`: buffered writes that were never committed
//! vanish and any locks go back to the table.

use crate::{
    context::OpContext,
    error::{Error, Result},
    locks::{LockMode, LockSet, LockTable},
    store::LedgerStore,
    types::{Account, AccountId, Strategy},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Access handle for one read-modify-write
pub trait Access {
    /// Read an account under the strategy's rules
    fn read(&mut self, id: &AccountId) -> Result<Account>;

    /// Issue a write of a previously read account
    fn write(&mut self, account: Account) -> Result<()>;

    /// Make issued writes durable
    fn commit(&mut self) -> Result<()>;

    /// Writes already visible in the store (non-zero only for `uncontrolled`)
    fn applied_writes(&self) -> usize;

    /// Time spent waiting to acquire
    fn waited(&self) -> Duration {
        Duration::ZERO
    }
}

/// A concurrency-control policy over the ledger store
pub trait ConcurrencyControl: Send + Sync {
    /// Which strategy this is
    fn strategy(&self) -> Strategy;

    /// Acquire access to `ids`
    fn acquire<'a>(
        &'a self,
        store: &'a LedgerStore,
        ids: &[AccountId],
        ctx: &OpContext,
    ) -> Result<Box<dyn Access + 'a>>;
}

/// Build the control object for a strategy
///
/// `lock_timeout` bounds pessimistic lock acquisition only; the rest of the
/// operation runs under the caller's context.
pub fn control_for(
    strategy: Strategy,
    locks: &Arc<LockTable>,
    lock_timeout: Option<Duration>,
) -> Box<dyn ConcurrencyControl> {
    match strategy {
        Strategy::Uncontrolled => Box::new(Uncontrolled),
        Strategy::Atomic => Box::new(Atomic),
        Strategy::Optimistic => Box::new(Optimistic),
        Strategy::Pessimistic => {
            let mut control = Pessimistic::new(locks.clone());
            control.lock_timeout = lock_timeout;
            Box::new(control)
        }
    }
}

/// No isolation: every write lands as soon as it is issued
#[derive(Debug, Clone, Copy, Default)]
pub struct Uncontrolled;

struct UncontrolledAccess<'a> {
    store: &'a LedgerStore,
    applied: usize,
}

impl ConcurrencyControl for Uncontrolled {
    fn strategy(&self) -> Strategy {
        Strategy::Uncontrolled
    }

    fn acquire<'a>(
        &'a self,
        store: &'a LedgerStore,
        _ids: &[AccountId],
        _ctx: &OpContext,
    ) -> Result<Box<dyn Access + 'a>> {
        Ok(Box::new(UncontrolledAccess { store, applied: 0 }))
    }
}

impl Access for UncontrolledAccess<'_> {
    fn read(&mut self, id: &AccountId) -> Result<Account> {
        self.store.get(id)
    }

    fn write(&mut self, account: Account) -> Result<()> {
        self.store.put(&account)?;
        self.applied += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn applied_writes(&self) -> usize {
        self.applied
    }
}

/// Writes buffered until commit, shared by the atomic strategies
#[derive(Default)]
struct WriteBuffer {
    pending: Vec<Account>,
}

impl WriteBuffer {
    fn push(&mut self, account: Account) {
        // A second write to the same account replaces the first
        self.pending.retain(|a| a.id != account.id);
        self.pending.push(account);
    }

    fn take(&mut self) -> Vec<Account> {
        std::mem::take(&mut self.pending)
    }
}

/// Versions remembered at read time, checked by one batch commit
///
/// Shared by `atomic` and `optimistic`; they differ only in the think time
/// the orchestrator spends between read and write.
struct VersionedAccess<'a> {
    store: &'a LedgerStore,
    strategy: Strategy,
    read_versions: HashMap<AccountId, u64>,
    buffer: WriteBuffer,
}

impl<'a> VersionedAccess<'a> {
    fn new(store: &'a LedgerStore, strategy: Strategy) -> Self {
        Self {
            store,
            strategy,
            read_versions: HashMap::new(),
            buffer: WriteBuffer::default(),
        }
    }
}

impl Access for VersionedAccess<'_> {
    fn read(&mut self, id: &AccountId) -> Result<Account> {
        let account = self.store.get(id)?;
        // Keep the version of the first read; that is what the commit checks
        self.read_versions
            .entry(id.clone())
            .or_insert(account.version);
        Ok(account)
    }

    fn write(&mut self, mut account: Account) -> Result<()> {
        let expected = self.read_versions.get(&account.id).copied().ok_or_else(|| {
            Error::InvariantViolation(format!(
                "{} write to {} without a prior read",
                self.strategy, account.id
            ))
        })?;
        account.version = expected;
        self.buffer.push(account);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.store.put_all_if_versions_match(&self.buffer.take())?;
        Ok(())
    }

    fn applied_writes(&self) -> usize {
        0
    }
}

/// All-or-nothing commit, version-checked, no think time
#[derive(Debug, Clone, Copy, Default)]
pub struct Atomic;

impl ConcurrencyControl for Atomic {
    fn strategy(&self) -> Strategy {
        Strategy::Atomic
    }

    fn acquire<'a>(
        &'a self,
        store: &'a LedgerStore,
        _ids: &[AccountId],
        _ctx: &OpContext,
    ) -> Result<Box<dyn Access + 'a>> {
        Ok(Box::new(VersionedAccess::new(store, Strategy::Atomic)))
    }
}

/// Version check at commit after a think time; conflicts fail instead of retrying
#[derive(Debug, Clone, Copy, Default)]
pub struct Optimistic;

impl ConcurrencyControl for Optimistic {
    fn strategy(&self) -> Strategy {
        Strategy::Optimistic
    }

    fn acquire<'a>(
        &'a self,
        store: &'a LedgerStore,
        _ids: &[AccountId],
        _ctx: &OpContext,
    ) -> Result<Box<dyn Access + 'a>> {
        Ok(Box::new(VersionedAccess::new(store, Strategy::Optimistic)))
    }
}

/// Exclusive per-account locks for the whole read-modify-write
#[derive(Debug, Clone)]
pub struct Pessimistic {
    locks: Arc<LockTable>,
    lock_timeout: Option<Duration>,
}

impl Pessimistic {
    /// Strategy over a shared lock table, waiting as long as the context allows
    pub fn new(locks: Arc<LockTable>) -> Self {
        Self {
            locks,
            lock_timeout: None,
        }
    }

    /// Give up on lock acquisition after `timeout`
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

struct PessimisticAccess<'a> {
    store: &'a LedgerStore,
    buffer: WriteBuffer,
    // Dropped with the handle
    locks: LockSet,
}

impl ConcurrencyControl for Pessimistic {
    fn strategy(&self) -> Strategy {
        Strategy::Pessimistic
    }

    fn acquire<'a>(
        &'a self,
        store: &'a LedgerStore,
        ids: &[AccountId],
        ctx: &OpContext,
    ) -> Result<Box<dyn Access + 'a>> {
        let locks = match self.lock_timeout {
            Some(timeout) => self.locks.acquire(ids, LockMode::Exclusive, &ctx.bounded(timeout))?,
            None => self.locks.acquire(ids, LockMode::Exclusive, ctx)?,
        };
        Ok(Box::new(PessimisticAccess {
            store,
            buffer: WriteBuffer::default(),
            locks,
        }))
    }
}

impl PessimisticAccess<'_> {
    fn ensure_locked(&self, id: &AccountId) -> Result<()> {
        if self.locks.accounts().contains(id) {
            Ok(())
        } else {
            Err(Error::InvariantViolation(format!(
                "pessimistic access to unlocked account {}",
                id
            )))
        }
    }
}

impl Access for PessimisticAccess<'_> {
    fn read(&mut self, id: &AccountId) -> Result<Account> {
        self.ensure_locked(id)?;
        self.store.get(id)
    }

    fn write(&mut self, account: Account) -> Result<()> {
        self.ensure_locked(&account.id)?;
        self.buffer.push(account);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        // Writers that ignore the locks still cannot be silently overwritten
        self.store.put_all_if_versions_match(&self.buffer.take())?;
        Ok(())
    }

    fn applied_writes(&self) -> usize {
        0
    }

    fn waited(&self) -> Duration {
        self.locks.waited()
    }
}
