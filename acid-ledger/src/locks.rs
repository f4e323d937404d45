//! Lock table for pessimistic concurrency control
//!
//! One reader-writer lock per account id, created lazily. A [`LockSet`]
//! acquires the locks for a group of accounts in ascending id order, which
//! rules out deadlock between transfers touching the same pair in opposite
//! directions. Locks are not reentrant: the same id is only ever taken once
//! per set. Dropping the set releases everything on every exit path,
//! unwinding included, and evicts the entries no one else is using.

use crate::{
    context::OpContext,
    error::{Error, Result},
    types::AccountId,
};
use dashmap::DashMap;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers
    Shared,
    /// Single writer
    Exclusive,
}

// Guards are only held for their Drop
#[allow(dead_code)]
enum Held {
    Shared(ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Per-account lock registry
///
/// Entries live only while some [`LockSet`] or waiter holds them; the last
/// set to let go of an id evicts its entry.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Arc<DashMap<AccountId, Arc<RwLock<()>>>>,
}

impl LockTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &AccountId) -> Arc<RwLock<()>> {
        // Clone the Arc out so the shard guard is released before blocking
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }

    /// Acquire `mode` locks on `ids` in global order
    ///
    /// Fails with [`Error::LockTimeout`] if the context deadline passes and
    /// with [`Error::Cancelled`] if its token fires while waiting. Locks taken
    /// before the failure are released.
    pub fn acquire(&self, ids: &[AccountId], mode: LockMode, ctx: &OpContext) -> Result<LockSet> {
        let mut ordered: Vec<AccountId> = ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let started = Instant::now();
        let mut set = LockSet {
            ids: Vec::with_capacity(ordered.len()),
            mode,
            held: Vec::with_capacity(ordered.len()),
            waited: Duration::ZERO,
            table: Arc::clone(&self.locks),
        };
        for id in ordered {
            let lock = self.lock_for(&id);
            let guard = Self::wait_for(&lock, &id, mode, ctx, started);
            // Our clone must be gone before a failed set evicts on drop
            drop(lock);
            set.ids.push(id);
            set.held.push(guard?);
        }

        set.waited = started.elapsed();
        tracing::debug!(
            accounts = ?set.ids,
            mode = ?mode,
            waited_ms = set.waited.as_millis() as u64,
            "Locks acquired"
        );

        Ok(set)
    }

    fn wait_for(
        lock: &Arc<RwLock<()>>,
        id: &AccountId,
        mode: LockMode,
        ctx: &OpContext,
        started: Instant,
    ) -> Result<Held> {
        loop {
            ctx.check("lock acquisition").map_err(|err| match err {
                Error::DeadlineExceeded(_) => Error::LockTimeout {
                    account: id.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                },
                other => other,
            })?;

            let slice = ctx.next_slice().max(Duration::from_millis(1));
            let acquired = match mode {
                LockMode::Shared => lock.try_read_arc_for(slice).map(Held::Shared),
                LockMode::Exclusive => lock.try_write_arc_for(slice).map(Held::Exclusive),
            };
            if let Some(guard) = acquired {
                return Ok(guard);
            }
        }
    }

    /// Check if any lock is currently held on the account
    pub fn is_locked(&self, id: &AccountId) -> bool {
        self.locks
            .get(id)
            .map_or(false, |lock| lock.is_locked())
    }

    /// Number of accounts with a live lock entry
    pub fn tracked_accounts(&self) -> usize {
        self.locks.len()
    }
}

/// Locks held for the duration of one operation
pub struct LockSet {
    ids: Vec<AccountId>,
    mode: LockMode,
    held: Vec<Held>,
    waited: Duration,
    table: Arc<DashMap<AccountId, Arc<RwLock<()>>>>,
}

impl LockSet {
    /// Locked ids in acquisition order
    pub fn accounts(&self) -> &[AccountId] {
        &self.ids
    }

    /// Mode of every lock in the set
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Time spent waiting for the set
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl fmt::Debug for LockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockSet")
            .field("ids", &self.ids)
            .field("mode", &self.mode)
            .field("held", &self.held.len())
            .finish()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        // Release in reverse acquisition order
        while let Some(guard) = self.held.pop() {
            drop(guard);
        }
        // The table holds one reference; anything more is a holder or a waiter
        for id in &self.ids {
            self.table.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        }
        tracing::trace!(accounts = ?self.ids, "Locks released");
    }
}
