//! Named-Resource Mutex Registry
//!
//! The remote API offers no protection against two operations on the same
//! project racing each other (a read-modify-write losing an update, or two
//! creates for one name). Every lifecycle operation therefore takes a
//! reader/writer lock keyed by the resource name before talking to the
//! server. Locks are created lazily on first use and live as long as the
//! registry.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

// =============================================================================
// Lock Mode
// =============================================================================

/// Access mode for a named resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared with other readers, excludes writers
    Read,
    /// Exclusive
    Write,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

// =============================================================================
// Resource Guard
// =============================================================================

// Guards are held only for their Drop, which releases the lock
#[allow(dead_code)]
enum GuardInner {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Held lock on a named resource; released when dropped
pub struct ResourceGuard {
    name: String,
    inner: GuardInner,
}

impl ResourceGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> LockMode {
        match self.inner {
            GuardInner::Read(_) => LockMode::Read,
            GuardInner::Write(_) => LockMode::Write,
        }
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        trace!(resource = %self.name, mode = %self.mode(), "released resource lock");
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutexRegistryStats {
    pub entries: u64,
    pub read_acquisitions: u64,
    pub write_acquisitions: u64,
}

/// Map from resource name to its reader/writer lock
pub struct NamedMutexRegistry {
    locks: DashMap<String, Arc<RwLock<()>>>,
    read_acquisitions: AtomicU64,
    write_acquisitions: AtomicU64,
}

impl NamedMutexRegistry {
    /// Create a new registry, one per provider session
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lock for `name`, inserting it if this is the first reference.
    ///
    /// The insert goes through the map's entry API, so concurrent first
    /// references agree on a single lock.
    pub fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.get(name) {
            return lock.value().clone();
        }

        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }

    /// Wait for the lock on `name` in the given mode
    pub async fn acquire(&self, name: &str, mode: LockMode) -> ResourceGuard {
        let lock = self.lock_for(name);

        let inner = match mode {
            LockMode::Read => GuardInner::Read(lock.read_owned().await),
            LockMode::Write => GuardInner::Write(lock.write_owned().await),
        };

        self.record(mode);
        trace!(resource = %name, mode = %mode, "acquired resource lock");

        ResourceGuard {
            name: name.to_string(),
            inner,
        }
    }

    /// Take the lock on `name` only if it is free for `mode` right now
    pub fn try_acquire(&self, name: &str, mode: LockMode) -> Option<ResourceGuard> {
        let lock = self.lock_for(name);

        let inner = match mode {
            LockMode::Read => GuardInner::Read(lock.try_read_owned().ok()?),
            LockMode::Write => GuardInner::Write(lock.try_write_owned().ok()?),
        };

        self.record(mode);

        Some(ResourceGuard {
            name: name.to_string(),
            inner,
        })
    }

    /// Shared access to `name`
    pub async fn read(&self, name: &str) -> ResourceGuard {
        self.acquire(name, LockMode::Read).await
    }

    /// Exclusive access to `name`
    pub async fn write(&self, name: &str) -> ResourceGuard {
        self.acquire(name, LockMode::Write).await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.locks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn stats(&self) -> MutexRegistryStats {
        MutexRegistryStats {
            entries: self.locks.len() as u64,
            read_acquisitions: self.read_acquisitions.load(Ordering::Relaxed),
            write_acquisitions: self.write_acquisitions.load(Ordering::Relaxed),
        }
    }

    fn record(&self, mode: LockMode) {
        let counter = match mode {
            LockMode::Read => &self.read_acquisitions,
            LockMode::Write => &self.write_acquisitions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for NamedMutexRegistry {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
            read_acquisitions: AtomicU64::new(0),
            write_acquisitions: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for NamedMutexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedMutexRegistry")
            .field("entries", &self.locks.len())
            .finish()
    }
}
