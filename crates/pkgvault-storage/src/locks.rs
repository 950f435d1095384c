use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Exclusive hold on one package name. Released on drop.
///
/// Releasing the last hold on a name also removes its entry from the table.
#[derive(Debug)]
pub struct PackageLockGuard {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl PackageLockGuard {
    pub fn package_name(&self) -> &str {
        &self.name
    }
}

impl Drop for PackageLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let Ok(mut table) = self.table.lock() else {
            return;
        };
        // Only the table's own reference left: no holder and no waiter.
        if table
            .get(&self.name)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            table.remove(&self.name);
        }
    }
}

/// Per-package-name async mutexes.
///
/// Backends that serialize writers for the same package share one of these
/// across all handles they issue. Locks for different names never contend.
/// An entry lives only while a guard or a waiter references it; a waiter
/// cancelled while queued is reclaimed at the next release of that name.
#[derive(Debug, Default, Clone)]
pub struct PackageLocks {
    locks: LockTable,
}

impl PackageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> PackageLockGuard {
        let mutex = {
            let mut locks = self.locks.lock().expect("lock table poisoned");
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        PackageLockGuard {
            name: name.to_string(),
            guard: Some(mutex.lock_owned().await),
            table: Arc::clone(&self.locks),
        }
    }

    /// Number of names currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().expect("lock table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
