use crate::registry::KeyedLockRegistry;
use parking_lot::Mutex;
use std::{
    hash::Hash,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
};
use tokio::sync::OwnedMutexGuard;

/// An RAII implementation of a scoped keyed lock. The lock is released when
/// the guard is dropped or when [`release`](Guard::release) is called,
/// whichever comes first.
pub struct Guard<'r, K: Eq + Hash + Clone> {
    registry: &'r KeyedLockRegistry<K>,
    key: K,
    slot_guard: Mutex<Option<OwnedMutexGuard<()>>>,
    released: AtomicBool,
}

impl<'r, K: Eq + Hash + Clone> Guard<'r, K> {
    pub(crate) fn new(
        registry: &'r KeyedLockRegistry<K>,
        key: K,
        guard: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            registry,
            key,
            slot_guard: Mutex::new(Some(guard)),
            released: AtomicBool::new(false),
        }
    }

    /// The key this guard holds locked.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Releases the lock.
    ///
    /// Only the first call releases; every later call, from this or any other
    /// thread sharing the guard, is a no-op. Dropping the guard calls this
    /// implicitly.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let guard = self.slot_guard.lock().take();
        if let Some(guard) = guard {
            self.registry.unlock(&self.key, guard);
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for Guard<'_, K> {
    fn drop(&mut self) {
        self.release();
    }
}

/// An RAII implementation of a scoped keyed lock for an
/// `Arc<KeyedLockRegistry>`. The lock is released when the guard is dropped
/// or when [`release`](OwnedGuard::release) is called, whichever comes first.
pub struct OwnedGuard<K: Eq + Hash + Clone> {
    registry: Arc<KeyedLockRegistry<K>>,
    key: K,
    slot_guard: Mutex<Option<OwnedMutexGuard<()>>>,
    released: AtomicBool,
}

impl<K: Eq + Hash + Clone> OwnedGuard<K> {
    pub(crate) fn new(
        registry: Arc<KeyedLockRegistry<K>>,
        key: K,
        guard: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            registry,
            key,
            slot_guard: Mutex::new(Some(guard)),
            released: AtomicBool::new(false),
        }
    }

    /// The key this guard holds locked.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Releases the lock.
    ///
    /// Only the first call releases; every later call, from this or any other
    /// thread sharing the guard, is a no-op. Dropping the guard calls this
    /// implicitly.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let guard = self.slot_guard.lock().take();
        if let Some(guard) = guard {
            self.registry.unlock(&self.key, guard);
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for OwnedGuard<K> {
    fn drop(&mut self) {
        self.release();
    }
}
