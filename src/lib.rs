//! This crate provides a keyed lock registry: exclusive locks scoped to a
//! key, so that callers acquiring equal keys serialize while callers on
//! unequal keys never contend. This is useful when many independent resources
//! (string names, numeric ids, composite value keys) must each be serialized
//! without funneling everything through one global lock.
//!
//! Per-key entries are created on first use and garbage-collected once nobody
//! holds or waits on them, so the registry stays as small as the set of keys
//! currently in use. Blocking and suspending acquirers can share a registry,
//! and a suspending acquire can be abandoned through a [`CancellationToken`]
//! without leaking an entry.
//!
//! ```
//! use lock_registry::KeyedLockRegistry;
//!
//! let registry = KeyedLockRegistry::new();
//! let guard = registry.acquire("user:42");
//! // exclusive section for "user:42"
//! drop(guard);
//! assert!(!registry.is_locked("user:42"));
//! ```

mod error;
mod guard;
mod registry;

pub use error::AcquireError;
pub use guard::{Guard, OwnedGuard};
pub use registry::KeyedLockRegistry;

pub use tokio_util::sync::CancellationToken;
