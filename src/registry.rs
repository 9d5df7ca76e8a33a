use crate::{AcquireError, Guard, OwnedGuard};
use parking_lot::Mutex;
use std::{borrow::Borrow, collections::HashMap, hash::Hash, sync::Arc};
use tokio::sync::{Mutex as SlotMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// The exclusion primitive bound to one key. The map holds one reference;
/// every holder, waiter and in-flight acquirer holds another, so the strong
/// count is the slot's interest count plus one.
type Slot = Arc<SlotMutex<()>>;

/// A registry of per-key exclusive locks.
///
/// Acquiring a key locks out other acquirers of an equal key, while acquirers
/// of unequal keys never wait on each other. Entries are created on first use
/// and removed once nobody holds or waits on them, so the registry stays as
/// small as the set of keys currently in use.
///
/// Blocking and suspending acquirers may share a registry and a key.
/// Acquisition is not reentrant: acquiring a key already held by the caller
/// deadlocks.
pub struct KeyedLockRegistry<K: Eq + Hash + Clone>(Mutex<HashMap<K, Slot>>);

impl<K: Eq + Hash + Clone> KeyedLockRegistry<K> {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self(Mutex::new(HashMap::new()))
    }

    /// Acquires the lock for `key`, blocking the calling thread until it is
    /// available.
    ///
    /// When the returned `Guard` is released or dropped, the lock is
    /// released.
    ///
    /// # Panics
    ///
    /// Panics when called from an asynchronous execution context; use
    /// [`acquire_async`](Self::acquire_async) there instead.
    pub fn acquire(&self, key: K) -> Guard<'_, K> {
        let guard = self.slot(&key).blocking_lock_owned();
        Guard::new(self, key, guard)
    }

    /// Acquires the lock for `key`, returning an `OwnedGuard`.
    ///
    /// This method is for use with `Arc<KeyedLockRegistry>`, when the guard
    /// must not borrow the registry. The blocking and panic behavior is the
    /// same as [`acquire`](Self::acquire).
    pub fn acquire_owned(self: &Arc<Self>, key: K) -> OwnedGuard<K> {
        let guard = self.slot(&key).blocking_lock_owned();
        OwnedGuard::new(Arc::clone(self), key, guard)
    }

    /// Acquires the lock for `key`, suspending the calling task until it is
    /// available or `cancel` fires.
    ///
    /// The race between a grant and a cancellation is decided in favor of the
    /// grant: whenever the lock is grantable it is granted, even if `cancel`
    /// had already fired — in particular, acquiring an uncontended key with a
    /// cancelled token still succeeds. An `Err` therefore means no grant
    /// happened and the caller owes no release.
    ///
    /// The returned future is cancel safe; abandoning it (for example inside
    /// [`tokio::time::timeout`]) withdraws the attempt without leaking a
    /// registry entry.
    ///
    /// # Examples
    ///
    /// ```
    /// use lock_registry::{AcquireError, CancellationToken, KeyedLockRegistry};
    ///
    /// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
    /// let registry = KeyedLockRegistry::new();
    /// let held = registry.acquire_async("job:7", &CancellationToken::new()).await?;
    ///
    /// let cancel = CancellationToken::new();
    /// cancel.cancel();
    /// let attempt = registry.acquire_async("job:7", &cancel).await;
    /// assert_eq!(attempt.err(), Some(AcquireError::Cancelled));
    /// # Ok::<(), AcquireError>(())
    /// # }).unwrap();
    /// ```
    pub async fn acquire_async(
        &self,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<Guard<'_, K>, AcquireError> {
        match self.wait(&key, cancel).await {
            Some(guard) => Ok(Guard::new(self, key, guard)),
            None => Err(AcquireError::Cancelled),
        }
    }

    /// Acquires the lock for `key`, returning an `OwnedGuard`.
    ///
    /// This method is for use with `Arc<KeyedLockRegistry>`. The waiting and
    /// cancellation behavior is the same as
    /// [`acquire_async`](Self::acquire_async).
    pub async fn acquire_owned_async(
        self: &Arc<Self>,
        key: K,
        cancel: &CancellationToken,
    ) -> Result<OwnedGuard<K>, AcquireError> {
        match self.wait(&key, cancel).await {
            Some(guard) => Ok(OwnedGuard::new(Arc::clone(self), key, guard)),
            None => Err(AcquireError::Cancelled),
        }
    }

    /// Attempts to acquire the lock for `key` without waiting.
    ///
    /// Returns `None` if the lock is currently held.
    pub fn try_acquire(&self, key: K) -> Option<Guard<'_, K>> {
        let guard = self.slot(&key).try_lock_owned().ok()?;
        Some(Guard::new(self, key, guard))
    }

    /// Attempts to acquire the lock for `key` without waiting, returning an
    /// `OwnedGuard`.
    pub fn try_acquire_owned(self: &Arc<Self>, key: K) -> Option<OwnedGuard<K>> {
        let guard = self.slot(&key).try_lock_owned().ok()?;
        Some(OwnedGuard::new(Arc::clone(self), key, guard))
    }

    /// Returns whether the lock for `key` is held at this instant.
    ///
    /// This is a racy snapshot, not linearized with concurrent acquires and
    /// releases: `false` means "not locked right now, as far as this call
    /// could tell", never "never locked".
    pub fn is_locked<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        match self.0.lock().get(key) {
            Some(slot) => slot.try_lock().is_err(),
            None => false,
        }
    }

    /// Waits for the slot of `key`. Loses to `cancel` only while the slot is
    /// not grantable: the `biased` select polls the lock first, so a grant
    /// racing a cancellation always wins.
    async fn wait(&self, key: &K, cancel: &CancellationToken) -> Option<OwnedMutexGuard<()>> {
        let slot = self.slot(key);
        let granted = tokio::select! {
            biased;
            guard = slot.lock_owned() => Some(guard),
            () = cancel.cancelled() => None,
        };
        if granted.is_none() {
            debug!("keyed acquire cancelled before grant");
            // The dropped wait already gave up its slot reference; the entry
            // may now be orphaned if the holder released in the meantime.
            self.reclaim(key);
        }
        granted
    }

    /// Gets the slot for `key`, installing a fresh one if absent.
    ///
    /// The returned clone keeps the slot's interest count raised for the
    /// duration of the caller's acquire attempt. Get-or-create is a single
    /// step under the registry mutex, so two racing first-acquires converge
    /// on the same slot.
    fn slot(&self, key: &K) -> Slot {
        let mut slots = self.0.lock();
        if let Some(slot) = slots.get(key) {
            Arc::clone(slot)
        } else {
            let slot = Arc::new(SlotMutex::new(()));
            slots.insert(key.clone(), Arc::clone(&slot));
            trace!(entries = slots.len(), "installed slot for new key");
            slot
        }
    }

    /// Releases a guard's slot, removing the map entry when the releasing
    /// guard is the last interested party.
    pub(crate) fn unlock(&self, key: &K, guard: OwnedMutexGuard<()>) {
        let mut slots = self.0.lock();
        // A strong count of 2 means only the map and the guard being released
        // still reference the slot: no waiter, no acquire in flight. Checked
        // while the guard still holds the slot, so no acquirer can slip in
        // between the check and the removal.
        if let Some(slot) = slots.get(key) {
            if Arc::strong_count(slot) == 2 {
                slots.remove(key);
                trace!(entries = slots.len(), "reclaimed idle slot");
            }
        }
        drop(slots);
        // Unlocks the slot, waking the next waiter if one survived the check.
        drop(guard);
    }

    /// Removes the entry for `key` when nothing references its slot anymore.
    ///
    /// Called after an abandoned acquire attempt, which may have been the
    /// last party keeping an unlocked slot alive. Removal is best-effort
    /// memory hygiene; skipping it never affects mutual exclusion.
    fn reclaim(&self, key: &K) {
        let mut slots = self.0.lock();
        if let Some(slot) = slots.get(key) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(key);
                trace!(entries = slots.len(), "reclaimed idle slot");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn registry_len(&self) -> usize {
        self.0.lock().len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLockRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
