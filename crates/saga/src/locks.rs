//! Per-key async locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::CorrelationId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<CorrelationId, Arc<AsyncMutex<()>>>;

/// One async mutex per correlation ID, created on demand.
///
/// The map itself is only locked synchronously to find or insert an entry, so
/// waiting on one key never blocks another. Entries are removed when the last
/// holder releases them.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl KeyedLocks {
    /// Creates an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `correlation_id`.
    pub async fn acquire(&self, correlation_id: CorrelationId) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(correlation_id).or_default().clone()
        };

        // Declared before the wait so a cancelled waiter still cleans up.
        let release = Release {
            correlation_id,
            locks: Arc::clone(&self.locks),
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            release,
        }
    }

    /// Returns the number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no key is locked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    release: Release,
}

impl KeyGuard {
    /// Returns the locked key.
    pub fn correlation_id(&self) -> CorrelationId {
        self.release.correlation_id
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // The mutex must be unlocked before `release` inspects the map.
        drop(self.guard.take());
    }
}

/// Removes an idle map entry when dropped, whether the lock was held or only
/// waited on.
#[derive(Debug)]
struct Release {
    correlation_id: CorrelationId,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for Release {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds the mutex now: no holder and no waiter.
        if locks
            .get(&self.correlation_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.correlation_id);
        }
    }
}
