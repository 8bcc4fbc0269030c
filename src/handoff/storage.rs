//! SQLite storage for authorization handoffs.

use super::AuthorizationHandoff;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Persisted, TTL-bounded handoff records.
///
/// # Schema
/// ```sql
/// CREATE TABLE auth_handoffs (
///     id            TEXT PRIMARY KEY,
///     owner_id      INTEGER NOT NULL,
///     code          TEXT NOT NULL,
///     source_ip     TEXT NOT NULL,
///     created_at_ms INTEGER NOT NULL,
///     expires_at_ms INTEGER NOT NULL
/// );
/// ```
///
/// Both processes open the same file; reads re-check expiry because purges
/// only run on the sweep interval.
pub struct HandoffStore {
    conn: Mutex<Connection>,
}

impl HandoffStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        // The callback server writes while the bot reads
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .context("Failed to enable WAL journal")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS auth_handoffs (
                id            TEXT PRIMARY KEY,
                owner_id      INTEGER NOT NULL,
                code          TEXT NOT NULL,
                source_ip     TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_auth_handoffs_expiry
                ON auth_handoffs(expires_at_ms);
            CREATE INDEX IF NOT EXISTS idx_auth_handoffs_owner
                ON auth_handoffs(owner_id);
            "#,
        )
        .context("Failed to create auth_handoffs table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("handoff store lock poisoned"))
    }

    /// Persists a new handoff and returns it with its generated id.
    pub fn create(
        &self,
        owner_id: i64,
        code: &str,
        source_ip: &str,
        ttl_seconds: u64,
    ) -> Result<AuthorizationHandoff> {
        let created_at = Utc::now();
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX / 1000);
        let handoff = AuthorizationHandoff {
            id: Uuid::new_v4().to_string(),
            owner_id,
            code: code.to_string(),
            source_ip: source_ip.to_string(),
            created_at,
            expires_at: created_at + Duration::seconds(ttl),
        };

        self.lock()?
            .execute(
                r#"
                INSERT INTO auth_handoffs (
                    id, owner_id, code, source_ip, created_at_ms, expires_at_ms
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    handoff.id,
                    handoff.owner_id,
                    handoff.code,
                    handoff.source_ip,
                    handoff.created_at.timestamp_millis(),
                    handoff.expires_at.timestamp_millis(),
                ],
            )
            .context("Failed to store handoff")?;

        debug!(handoff_id = %handoff.id, owner_id, "Stored authorization handoff");
        Ok(handoff)
    }

    /// Looks up a live handoff. Expired rows read as absent.
    pub fn find(&self, id: &str) -> Result<Option<AuthorizationHandoff>> {
        let now_ms = Utc::now().timestamp_millis();
        let row = self
            .lock()?
            .query_row(
                r#"
                SELECT id, owner_id, code, source_ip, created_at_ms, expires_at_ms
                FROM auth_handoffs
                WHERE id = ?1 AND expires_at_ms > ?2
                "#,
                params![id, now_ms],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query handoff")?;

        let Some((id, owner_id, code, source_ip, created_at_ms, expires_at_ms)) = row else {
            return Ok(None);
        };

        Ok(Some(AuthorizationHandoff {
            id,
            owner_id,
            code,
            source_ip,
            created_at: from_millis(created_at_ms)?,
            expires_at: from_millis(expires_at_ms)?,
        }))
    }

    /// Deletes a handoff. Returns true if this call removed it.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .lock()?
            .execute("DELETE FROM auth_handoffs WHERE id = ?1", params![id])
            .context("Failed to delete handoff")?;
        Ok(removed > 0)
    }

    /// Deletes every handoff belonging to `owner_id`.
    pub fn delete_for_owner(&self, owner_id: i64) -> Result<usize> {
        self.lock()?
            .execute(
                "DELETE FROM auth_handoffs WHERE owner_id = ?1",
                params![owner_id],
            )
            .context("Failed to delete handoffs for owner")
    }

    /// Drops expired rows, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now_ms = Utc::now().timestamp_millis();
        self.lock()?
            .execute(
                "DELETE FROM auth_handoffs WHERE expires_at_ms <= ?1",
                params![now_ms],
            )
            .context("Failed to purge expired handoffs")
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("invalid timestamp in handoff row: {}", ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> HandoffStore {
        HandoffStore::new(":memory:").expect("Failed to create test store")
    }

    #[test]
    fn test_create_and_find() {
        let store = create_test_store();
        let created = store.create(42, "ABC123", "203.0.113.9", 600).unwrap();

        assert!(Uuid::parse_str(&created.id).is_ok());
        assert_eq!(created.expires_at - created.created_at, Duration::seconds(600));

        let found = store.find(&created.id).unwrap().unwrap();
        assert_eq!(found.owner_id, 42);
        assert_eq!(found.code, "ABC123");
        assert_eq!(found.source_ip, "203.0.113.9");
        assert_eq!(found.expires_at.timestamp_millis(), created.expires_at.timestamp_millis());
    }

    #[test]
    fn test_find_unknown() {
        let store = create_test_store();
        assert!(store.find("no-such-id").unwrap().is_none());
    }

    #[test]
    fn test_delete_is_single_use() {
        let store = create_test_store();
        let created = store.create(1, "code", "unknown", 600).unwrap();

        assert!(store.delete(&created.id).unwrap());
        assert!(!store.delete(&created.id).unwrap());
        assert!(store.find(&created.id).unwrap().is_none());
    }

    #[test]
    fn test_expired_handoff_is_absent_before_purge() {
        let store = create_test_store();
        let created = store.create(1, "code", "unknown", 0).unwrap();

        assert!(store.find(&created.id).unwrap().is_none());
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.purge_expired().unwrap(), 0);
    }

    #[test]
    fn test_delete_for_owner() {
        let store = create_test_store();
        let a = store.create(1, "a", "unknown", 600).unwrap();
        store.create(1, "b", "unknown", 600).unwrap();
        let other = store.create(2, "c", "unknown", 600).unwrap();

        assert_eq!(store.delete_for_owner(1).unwrap(), 2);
        assert!(store.find(&a.id).unwrap().is_none());
        assert!(store.find(&other.id).unwrap().is_some());
    }

    #[test]
    fn test_visible_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoffs.db");

        let writer = HandoffStore::new(&path).unwrap();
        let reader = HandoffStore::new(&path).unwrap();

        let created = writer.create(42, "ABC123", "unknown", 600).unwrap();
        assert_eq!(reader.find(&created.id).unwrap().unwrap().code, "ABC123");
    }
}
