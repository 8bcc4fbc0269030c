use super::{validate_display_name, ValidationError};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Minimal user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub owner_id: i64,
    pub display_name: Option<String>,
    pub created_at: String,
}

/// SQLite-backed user records.
///
/// # Schema
/// ```sql
/// CREATE TABLE users (
///     owner_id     INTEGER PRIMARY KEY,
///     display_name TEXT,
///     created_at   TEXT NOT NULL
/// );
/// ```
pub struct UserStore {
    conn: Mutex<Connection>,
}

impl UserStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                owner_id     INTEGER PRIMARY KEY,
                display_name TEXT,
                created_at   TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create users table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("user store lock poisoned"))
    }

    /// Creates the record if absent. Returns true if it was created.
    pub fn ensure(&self, owner_id: i64) -> Result<bool> {
        let inserted = self
            .lock()?
            .execute(
                "INSERT OR IGNORE INTO users (owner_id, created_at) VALUES (?1, ?2)",
                params![owner_id, Utc::now().to_rfc3339()],
            )
            .context("Failed to create user")?;
        Ok(inserted > 0)
    }

    pub fn get(&self, owner_id: i64) -> Result<Option<UserRecord>> {
        self.lock()?
            .query_row(
                "SELECT owner_id, display_name, created_at FROM users WHERE owner_id = ?1",
                params![owner_id],
                |row| {
                    Ok(UserRecord {
                        owner_id: row.get(0)?,
                        display_name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn display_name(&self, owner_id: i64) -> Result<Option<String>> {
        Ok(self.get(owner_id)?.and_then(|user| user.display_name))
    }

    /// Validates and stores a display name, creating the record if needed.
    ///
    /// The outer error is storage failure; the inner one is a rejected name.
    pub fn set_display_name(
        &self,
        owner_id: i64,
        raw: &str,
    ) -> Result<Result<String, ValidationError>> {
        let name = match validate_display_name(raw) {
            Ok(name) => name,
            Err(e) => return Ok(Err(e)),
        };

        self.lock()?
            .execute(
                r#"
                INSERT INTO users (owner_id, display_name, created_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(owner_id) DO UPDATE SET display_name = excluded.display_name
                "#,
                params![owner_id, name, Utc::now().to_rfc3339()],
            )
            .context("Failed to store display name")?;

        Ok(Ok(name))
    }

    /// Deletes the user record. Returns true if one existed.
    pub fn delete(&self, owner_id: i64) -> Result<bool> {
        let removed = self
            .lock()?
            .execute("DELETE FROM users WHERE owner_id = ?1", params![owner_id])
            .context("Failed to delete user")?;
        Ok(removed > 0)
    }
}
