//! Mutual exclusion between migration runs.
//!
//! Every source kind has its own slot: a mutex taken with `try_lock` and an
//! in-progress flag other kinds can read without locking. A second run of
//! the same kind is refused at once. Whether a run of one kind also refuses
//! to start while another kind is running is governed by "blocked-by" edges
//! between kinds, registered when the locks are built.
//!
//! Locks are an owned value shared through `Arc`, not process statics, so
//! independent pipelines (and tests) never see each other. Separate
//! processes are kept apart by a `LeaseGuard` over the target's `RunLease`.

use crate::error::{MigrationError, Result};
use crate::source::SourceKind;
use crate::storage::RunLease;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Slot {
    lock: Mutex<()>,
    running: AtomicBool,
}

/// Per-kind migration locks.
#[derive(Debug)]
pub struct MigrationLocks {
    slots: BTreeMap<SourceKind, Slot>,
    /// `(kind, by)`: `kind` may not start while `by` is running.
    blocked_by: BTreeSet<(SourceKind, SourceKind)>,
}

impl Default for MigrationLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationLocks {
    /// Locks where no two kinds may run at the same time.
    #[must_use]
    pub fn new() -> Self {
        let mut locks = Self::independent();
        for kind in SourceKind::ALL {
            for by in SourceKind::ALL {
                if kind != by {
                    locks.blocked_by.insert((kind, by));
                }
            }
        }
        locks
    }

    /// Locks where each kind only excludes itself.
    #[must_use]
    pub fn independent() -> Self {
        Self {
            slots: SourceKind::ALL
                .into_iter()
                .map(|kind| (kind, Slot::default()))
                .collect(),
            blocked_by: BTreeSet::new(),
        }
    }

    /// Add one directed edge: `kind` refuses to start while `by` runs.
    #[must_use]
    pub fn block(mut self, kind: SourceKind, by: SourceKind) -> Self {
        if kind != by {
            self.blocked_by.insert((kind, by));
        }
        self
    }

    /// Whether `kind` refuses to start while `by` runs.
    #[must_use]
    pub fn is_blocked_by(&self, kind: SourceKind, by: SourceKind) -> bool {
        self.blocked_by.contains(&(kind, by))
    }

    #[must_use]
    pub fn is_running(&self, kind: SourceKind) -> bool {
        self.slots
            .get(&kind)
            .is_some_and(|slot| slot.running.load(Ordering::SeqCst))
    }

    /// Try to start a `kind` migration without waiting.
    ///
    /// # Errors
    ///
    /// Returns `MigrationInProgress` naming the kind that is already running.
    pub fn try_begin(&self, kind: SourceKind) -> Result<MigrationPermit<'_>> {
        let busy = |running: SourceKind| MigrationError::MigrationInProgress {
            kind: running.to_string(),
        };
        let slot = self.slots.get(&kind).ok_or_else(|| busy(kind))?;

        let guard = match slot.lock.try_lock() {
            Ok(guard) => guard,
            // A previous run panicked while holding the lock; the lock
            // itself guards no data, so it is still usable.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(busy(kind)),
        };

        // Raise our flag before looking at the others so two kinds racing
        // here cannot both miss each other.
        slot.running.store(true, Ordering::SeqCst);
        for by in SourceKind::ALL {
            if self.is_blocked_by(kind, by) && self.is_running(by) {
                slot.running.store(false, Ordering::SeqCst);
                drop(guard);
                return Err(busy(by));
            }
        }

        tracing::debug!(kind = %kind, "Migration guard acquired");
        Ok(MigrationPermit {
            kind,
            running: &slot.running,
            _guard: guard,
        })
    }
}

/// Held for the duration of one run. Dropping it releases the slot.
#[derive(Debug)]
pub struct MigrationPermit<'a> {
    kind: SourceKind,
    running: &'a AtomicBool,
    _guard: MutexGuard<'a, ()>,
}

impl MigrationPermit<'_> {
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        self.kind
    }
}

impl Drop for MigrationPermit<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::debug!(kind = %self.kind, "Migration guard released");
    }
}

/// A target lease held for one run. Dropping it releases the lease.
pub struct LeaseGuard {
    lease: Arc<dyn RunLease>,
    holder: String,
}

impl std::fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

impl LeaseGuard {
    /// Take the target lease for a `kind` run under a fresh holder id.
    ///
    /// # Errors
    ///
    /// Returns `MigrationInProgress` when another process holds the lease,
    /// or the store error that prevented taking it.
    pub fn acquire(lease: &Arc<dyn RunLease>, kind: SourceKind) -> Result<Self> {
        let holder = Uuid::new_v4().to_string();
        lease.acquire_lease(kind.as_str(), &holder)?;
        Ok(Self {
            lease: Arc::clone(lease),
            holder,
        })
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lease.release_lease(&self.holder) {
            tracing::warn!(holder = %self.holder, error = %e, "Could not release migration lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::storage::sqlite::LEASE_KEY;

    #[test]
    fn test_lease_guard_releases_on_drop() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let lease: Arc<dyn RunLease> = store.clone();

        let held = LeaseGuard::acquire(&lease, SourceKind::Jsonl).unwrap();
        let err = LeaseGuard::acquire(&lease, SourceKind::Directory).unwrap_err();
        assert_eq!(err.to_string(), "A jsonl migration is already in progress");

        drop(held);
        assert!(store.get_metadata(LEASE_KEY).unwrap().is_none());
        assert!(LeaseGuard::acquire(&lease, SourceKind::Directory).is_ok());
    }

    #[test]
    fn test_same_kind_is_exclusive() {
        let locks = MigrationLocks::independent();
        let permit = locks.try_begin(SourceKind::Jsonl).unwrap();
        assert!(locks.is_running(SourceKind::Jsonl));

        let err = locks.try_begin(SourceKind::Jsonl).unwrap_err();
        assert!(matches!(err, MigrationError::MigrationInProgress { .. }));

        drop(permit);
        assert!(!locks.is_running(SourceKind::Jsonl));
        assert!(locks.try_begin(SourceKind::Jsonl).is_ok());
    }

    #[test]
    fn test_default_is_symmetric() {
        let locks = MigrationLocks::new();
        let _dir = locks.try_begin(SourceKind::Directory).unwrap();
        let err = locks.try_begin(SourceKind::Jsonl).unwrap_err();
        assert_eq!(err.to_string(), "A directory migration is already in progress");

        let locks = MigrationLocks::new();
        let _jsonl = locks.try_begin(SourceKind::Jsonl).unwrap();
        assert!(locks.try_begin(SourceKind::Directory).is_err());
    }

    #[test]
    fn test_independent_kinds_run_together() {
        let locks = MigrationLocks::independent();
        let _a = locks.try_begin(SourceKind::Directory).unwrap();
        let _b = locks.try_begin(SourceKind::Jsonl).unwrap();
        assert!(locks.is_running(SourceKind::Directory));
        assert!(locks.is_running(SourceKind::Jsonl));
    }

    #[test]
    fn test_one_way_block() {
        let locks =
            MigrationLocks::independent().block(SourceKind::Jsonl, SourceKind::Directory);
        assert!(locks.is_blocked_by(SourceKind::Jsonl, SourceKind::Directory));
        assert!(!locks.is_blocked_by(SourceKind::Directory, SourceKind::Jsonl));

        {
            let _dir = locks.try_begin(SourceKind::Directory).unwrap();
            assert!(locks.try_begin(SourceKind::Jsonl).is_err());
        }
        let _jsonl = locks.try_begin(SourceKind::Jsonl).unwrap();
        assert!(locks.try_begin(SourceKind::Directory).is_ok());
    }

    #[test]
    fn test_rejected_attempt_leaves_no_flag() {
        let locks = MigrationLocks::new();
        let dir = locks.try_begin(SourceKind::Directory).unwrap();
        assert!(locks.try_begin(SourceKind::Jsonl).is_err());
        assert!(!locks.is_running(SourceKind::Jsonl));
        drop(dir);
        assert!(locks.try_begin(SourceKind::Jsonl).is_ok());
    }
}
