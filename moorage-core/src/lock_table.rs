//! Keyed lock table
//!
//! Hands out exclusive, scoped holds on arbitrary string keys. Callers using
//! the same key serialize; callers using different keys never contend.
//!
//! Each key maps to an entry with a reference count of holders plus waiters.
//! Entries are created on first use and removed as soon as the count drops
//! to zero, so the table only ever holds keys that are in use.
//!
//! Waiters for a key are served in arrival order (the per-key lock is a
//! `tokio::sync::Mutex`, which is fair).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Errors from acquiring a keyed lock
#[derive(Debug, Error)]
pub enum LockError {
    /// The deadline passed before the key became free
    #[error("timed out after {timeout:?} waiting for lock {key}")]
    Timeout { key: String, timeout: Duration },
}

struct LockEntry {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters
    refcount: usize,
}

/// Process-wide registry of named locks
///
/// The entry map is guarded by its own short-lived mutex, never held across
/// an await, separate from the per-key locks handed out.
#[derive(Default)]
pub struct KeyedLockTable {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl std::fmt::Debug for KeyedLockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLockTable")
            .field("keys", &self.len())
            .finish()
    }
}

impl KeyedLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is exclusively held by the caller
    ///
    /// The hold is released when the returned guard is dropped.
    pub async fn lock(&self, key: impl Into<String>) -> KeyGuard<'_> {
        let (waiter, mutex) = self.register(key.into());
        let held = mutex.lock_owned().await;
        debug!("Acquired lock {}", waiter.key);
        KeyGuard { _held: held, waiter }
    }

    /// Like [`lock`](Self::lock), but give up once `timeout` has elapsed
    ///
    /// On timeout the table is left exactly as it was before the call.
    pub async fn lock_timeout(
        &self,
        key: impl Into<String>,
        timeout: Duration,
    ) -> Result<KeyGuard<'_>, LockError> {
        let (waiter, mutex) = self.register(key.into());
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(held) => {
                debug!("Acquired lock {}", waiter.key);
                Ok(KeyGuard { _held: held, waiter })
            }
            Err(_) => Err(LockError::Timeout {
                key: waiter.key.clone(),
                timeout,
            }),
        }
    }

    /// Take `key` only if nobody holds it right now
    pub fn try_lock(&self, key: impl Into<String>) -> Option<KeyGuard<'_>> {
        let (waiter, mutex) = self.register(key.into());
        let held = mutex.try_lock_owned().ok()?;
        debug!("Acquired lock {}", waiter.key);
        Some(KeyGuard { _held: held, waiter })
    }

    /// Number of callers holding or waiting for `key`
    pub fn refcount(&self, key: &str) -> usize {
        self.entries().get(key).map_or(0, |entry| entry.refcount)
    }

    /// Number of keys currently in use
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        // Bookkeeping never panics mid-update, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, key: String) -> (Waiter<'_>, Arc<AsyncMutex<()>>) {
        let mut entries = self.entries();
        let entry = entries.entry(key.clone()).or_insert_with(|| LockEntry {
            mutex: Arc::new(AsyncMutex::new(())),
            refcount: 0,
        });
        entry.refcount += 1;
        let mutex = Arc::clone(&entry.mutex);
        drop(entries);

        (Waiter { table: self, key }, mutex)
    }

    fn deregister(&self, key: &str) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                entries.remove(key);
            }
        }
    }
}

/// One unit of a key's refcount; given back on drop
///
/// Dropping a waiter that never acquired (timeout, cancelled future) leaves
/// no trace in the table.
struct Waiter<'a> {
    table: &'a KeyedLockTable,
    key: String,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.table.deregister(&self.key);
    }
}

/// Exclusive hold on a key
///
/// Released on drop, which covers early returns, errors, task cancellation
/// and unwinding.
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    // Field order matters: the per-key lock is released before the refcount.
    _held: OwnedMutexGuard<()>,
    waiter: Waiter<'a>,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.waiter.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        debug!("Released lock {}", self.waiter.key);
    }
}

impl std::fmt::Debug for KeyGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key()).finish()
    }
}
