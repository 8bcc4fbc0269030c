//! Shared state store backed by SQLite.
//!
//! Both processes open the same database file. Rows carry an absolute expiry
//! in milliseconds; sweeps are periodic, so every read re-checks expiry.

use super::{StateStore, StoreBackend};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// How long a writer waits on a lock held by the other process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// TTL-indexed key-value table shared across processes.
///
/// # Schema
/// ```sql
/// CREATE TABLE ephemeral_state (
///     key           TEXT PRIMARY KEY,
///     value         TEXT NOT NULL,
///     expires_at_ms INTEGER NOT NULL
/// );
/// CREATE INDEX idx_ephemeral_state_expiry ON ephemeral_state(expires_at_ms);
/// ```
pub struct SharedStore {
    conn: Arc<Mutex<Connection>>,
}

impl SharedStore {
    /// Opens (or creates) the shared store at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open shared state database")?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;

        // WAL lets the callback server read while the bot writes
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .context("Failed to enable WAL journal")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ephemeral_state (
                key           TEXT PRIMARY KEY,
                value         TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ephemeral_state_expiry
                ON ephemeral_state(expires_at_ms);
            "#,
        )
        .context("Failed to create ephemeral_state table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    ///
    /// A busy lock can hold a call for up to [`BUSY_TIMEOUT`], which must not
    /// stall a runtime worker.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| anyhow!("shared state connection lock poisoned"))?;
            f(&conn)
        })
        .await
        .context("Shared state task failed")?
    }

    #[cfg(test)]
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("shared state connection lock poisoned"))?;
        f(&conn)
    }

    async fn try_set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let ttl_ms = i64::try_from(ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        let expires_at_ms = Utc::now().timestamp_millis().saturating_add(ttl_ms);
        let (key, value) = (key.to_string(), value.to_string());
        self.blocking(move |conn| {
            conn.execute(
                r#"
                INSERT INTO ephemeral_state (key, value, expires_at_ms)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at_ms = excluded.expires_at_ms
                "#,
                params![key, value, expires_at_ms],
            )
            .context("Failed to write state")?;
            Ok(())
        })
        .await
    }

    async fn try_get(&self, key: &str) -> Result<Option<String>> {
        let now_ms = Utc::now().timestamp_millis();
        let key = key.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT value FROM ephemeral_state WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, now_ms],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read state")
        })
        .await
    }

    async fn try_delete(&self, key: &str) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();
        let key = key.to_string();
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let live = tx
                .query_row(
                    "SELECT 1 FROM ephemeral_state WHERE key = ?1 AND expires_at_ms > ?2",
                    params![key, now_ms],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            let removed = tx
                .execute("DELETE FROM ephemeral_state WHERE key = ?1", params![key])
                .context("Failed to delete state")?;
            tx.commit()?;
            Ok(live && removed > 0)
        })
        .await
    }

    async fn try_purge(&self) -> Result<usize> {
        let now_ms = Utc::now().timestamp_millis();
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM ephemeral_state WHERE expires_at_ms <= ?1",
                params![now_ms],
            )
            .context("Failed to purge expired state")
        })
        .await
    }
}

#[async_trait]
impl StateStore for SharedStore {
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> bool {
        match self.try_set(key, value, ttl_seconds).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Shared state write failed, value not stored");
                false
            }
        }
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.try_get(key).await.unwrap_or_else(|e| {
            warn!(error = %e, "Shared state read failed, treating as absent");
            None
        })
    }

    async fn delete(&self, key: &str) -> bool {
        self.try_delete(key).await.unwrap_or_else(|e| {
            warn!(error = %e, "Shared state delete failed");
            false
        })
    }

    async fn purge_expired(&self) -> usize {
        self.try_purge().await.unwrap_or_else(|e| {
            warn!(error = %e, "Shared state purge failed");
            0
        })
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Shared
    }
}
