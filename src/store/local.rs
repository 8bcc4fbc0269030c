//! Process-local state store.

use super::{StateStore, StoreBackend};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory TTL map behind a mutex.
///
/// Entries carry an absolute expiry instant. `get` ignores expired entries
/// that the sweeper has not removed yet.
pub struct LocalStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of physically held entries, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock cannot leave a half-written entry
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for LocalStore {
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> bool {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
        };
        self.lock().insert(key.to_string(), entry);
        true
    }

    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    async fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        match self.lock().remove(key) {
            Some(entry) => entry.is_live(now),
            None => false,
        }
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Local
    }
}
