//! Ephemeral TTL key-value state.
//!
//! Holds short-lived values such as CSRF states. Two backends sit behind the
//! [`StateStore`] trait:
//!
//! - [`LocalStore`]: in-process map, invisible to other processes
//! - [`SharedStore`]: SQLite table in a file both processes open
//!
//! The backend is chosen once at startup by [`connect`]. The bot and the
//! callback server must both be pointed at the same shared store, otherwise
//! the callback server never sees the states the bot issued.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

mod local;
mod shared;
mod sweeper;

pub use local::LocalStore;
pub use shared::SharedStore;
pub use sweeper::{spawn_sweeper, Sweeper};

/// Which backend is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Local,
    Shared,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Local => write!(f, "local"),
            StoreBackend::Shared => write!(f, "shared"),
        }
    }
}

/// TTL key-value store.
///
/// Implementations never surface I/O errors: a failed `set` reports `false`
/// ("not stored"), a failed `get` reports `None` and a failed `delete`
/// reports `false`. Expired entries are absent even before a sweep removes
/// them.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores `value` under `key` for `ttl_seconds`, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> bool;

    async fn get(&self, key: &str) -> Option<String>;

    /// Removes `key`. Returns true only if a live entry was removed.
    async fn delete(&self, key: &str) -> bool;

    /// Physically drops expired entries, returning how many were removed.
    async fn purge_expired(&self) -> usize;

    fn backend(&self) -> StoreBackend;
}

/// Opens the configured backend.
///
/// With `shared_path` set, opens the shared store at that path. If it cannot
/// be opened the process falls back to a local store and logs the
/// degradation; with no path, a local store is used.
pub fn connect(shared_path: Option<&str>) -> Arc<dyn StateStore> {
    match shared_path {
        Some(path) => match SharedStore::open(path) {
            Ok(store) => {
                info!(path = %path, "Using shared state store");
                Arc::new(store)
            }
            Err(e) => {
                warn!(
                    path = %path,
                    error = %e,
                    "Shared state store unreachable, degrading to local store; \
                     states issued here will not be visible to other processes"
                );
                Arc::new(LocalStore::new())
            }
        },
        None => {
            info!("Using local state store");
            Arc::new(LocalStore::new())
        }
    }
}
