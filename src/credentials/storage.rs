//! Encrypted credential storage using SQLite.
//!
//! Stores one OAuth credential per user. Both tokens are encrypted by the
//! vault before they reach the database.

use super::Credential;
use crate::vault::EncryptionVault;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Encrypted credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     owner_id             INTEGER PRIMARY KEY,
///     access_token_cipher  TEXT NOT NULL,   -- Encrypted
///     refresh_token_cipher TEXT NOT NULL,   -- Encrypted
///     expires_at           TEXT NOT NULL,   -- RFC 3339
///     created_at           TEXT NOT NULL,
///     updated_at           TEXT NOT NULL
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - Concurrent saves for one owner resolve as last-write-wins
pub struct CredentialRepository {
    conn: Mutex<Connection>,
    vault: EncryptionVault,
}

/// Encrypted row as stored.
struct StoredCredential {
    access_token_cipher: String,
    refresh_token_cipher: String,
    expires_at: String,
}

impl CredentialRepository {
    /// Creates or opens a credential repository.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file
    /// * `vault` - Vault holding the master key
    pub fn new<P: AsRef<Path>>(db_path: P, vault: EncryptionVault) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                owner_id             INTEGER PRIMARY KEY,
                access_token_cipher  TEXT NOT NULL,
                refresh_token_cipher TEXT NOT NULL,
                expires_at           TEXT NOT NULL,
                created_at           TEXT NOT NULL,
                updated_at           TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            vault,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("credential store lock poisoned"))
    }

    /// Stores the credential for `owner_id`, replacing any existing one.
    ///
    /// Both tokens are encrypted before the write.
    pub fn save(
        &self,
        owner_id: i64,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let access_token_cipher = self
            .vault
            .encrypt(access_token)
            .context("Failed to encrypt access token")?;
        let refresh_token_cipher = self
            .vault
            .encrypt(refresh_token)
            .context("Failed to encrypt refresh token")?;

        let now = Utc::now().to_rfc3339();

        // Upsert
        self.lock()?
            .execute(
                r#"
                INSERT INTO credentials (
                    owner_id, access_token_cipher, refresh_token_cipher,
                    expires_at, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(owner_id) DO UPDATE SET
                    access_token_cipher = excluded.access_token_cipher,
                    refresh_token_cipher = excluded.refresh_token_cipher,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    owner_id,
                    access_token_cipher,
                    refresh_token_cipher,
                    expires_at.to_rfc3339(),
                    now,
                    now,
                ],
            )
            .context("Failed to store credential")?;

        debug!(owner_id, "Stored encrypted credential");
        Ok(())
    }

    /// Loads and decrypts the credential for `owner_id`.
    ///
    /// Returns `None` when there is no credential, and also when the stored
    /// one cannot be read or decrypted. Those failures are logged, never
    /// propagated.
    pub fn load(&self, owner_id: i64) -> Option<Credential> {
        let stored = match self.fetch(owner_id) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                error!(owner_id, error = %e, "Failed to read credential, treating as absent");
                return None;
            }
        };

        match self.decrypt(owner_id, stored) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!(
                    owner_id,
                    error = %e,
                    "Stored credential could not be decrypted, treating as absent"
                );
                None
            }
        }
    }

    /// True if a credential row exists for `owner_id`, readable or not.
    pub fn exists(&self, owner_id: i64) -> Result<bool> {
        Ok(self.fetch(owner_id)?.is_some())
    }

    /// Deletes the credential for `owner_id`.
    ///
    /// # Returns
    /// * `Ok(true)` - Credential deleted
    /// * `Ok(false)` - No credential found
    pub fn delete(&self, owner_id: i64) -> Result<bool> {
        let rows_affected = self
            .lock()?
            .execute(
                "DELETE FROM credentials WHERE owner_id = ?1",
                params![owner_id],
            )
            .context("Failed to delete credential")?;

        Ok(rows_affected > 0)
    }

    /// Re-encrypts every stored credential under `new_key_base64`.
    ///
    /// Runs in one transaction: either every row moves to the new key or
    /// none does. The repository's own vault still holds the old key
    /// afterwards, so the process must restart with the new key.
    pub fn rotate_key(&self, new_key_base64: &str) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let rows: Vec<(i64, String, String)> = {
            let mut stmt = tx
                .prepare("SELECT owner_id, access_token_cipher, refresh_token_cipher FROM credentials")
                .context("Failed to prepare query")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .context("Failed to execute query")?
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read results")?;
            rows
        };

        for (owner_id, access_cipher, refresh_cipher) in &rows {
            let access = self
                .vault
                .rotate_key(access_cipher, new_key_base64)
                .with_context(|| format!("Failed to rotate access token for owner {}", owner_id))?;
            let refresh = self
                .vault
                .rotate_key(refresh_cipher, new_key_base64)
                .with_context(|| format!("Failed to rotate refresh token for owner {}", owner_id))?;
            tx.execute(
                r#"
                UPDATE credentials
                SET access_token_cipher = ?1, refresh_token_cipher = ?2, updated_at = ?3
                WHERE owner_id = ?4
                "#,
                params![access, refresh, Utc::now().to_rfc3339(), owner_id],
            )
            .context("Failed to update rotated credential")?;
        }

        tx.commit().context("Failed to commit key rotation")?;

        info!(count = rows.len(), "Re-encrypted credentials under new key");
        Ok(rows.len())
    }

    fn fetch(&self, owner_id: i64) -> Result<Option<StoredCredential>> {
        self.lock()?
            .query_row(
                r#"
                SELECT access_token_cipher, refresh_token_cipher, expires_at
                FROM credentials
                WHERE owner_id = ?1
                "#,
                params![owner_id],
                |row| {
                    Ok(StoredCredential {
                        access_token_cipher: row.get(0)?,
                        refresh_token_cipher: row.get(1)?,
                        expires_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credential")
    }

    fn decrypt(&self, owner_id: i64, stored: StoredCredential) -> Result<Credential> {
        let access_token = self
            .vault
            .decrypt(&stored.access_token_cipher)
            .context("Failed to decrypt access token")?;
        let refresh_token = self
            .vault
            .decrypt(&stored.refresh_token_cipher)
            .context("Failed to decrypt refresh token")?;
        let expires_at = DateTime::parse_from_rfc3339(&stored.expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .context("Failed to parse expires_at timestamp")?;

        Ok(Credential {
            owner_id,
            access_token,
            refresh_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::Duration as ChronoDuration;

    fn vault(byte: u8) -> EncryptionVault {
        EncryptionVault::new(&BASE64.encode([byte; 32])).unwrap()
    }

    fn create_test_repository() -> CredentialRepository {
        CredentialRepository::new(":memory:", vault(0)).expect("Failed to create test repository")
    }

    #[test]
    fn test_save_and_load() {
        let repo = create_test_repository();
        let expires_at = Utc::now() + ChronoDuration::hours(1);

        repo.save(42, "access-token-12345", "refresh-token-67890", expires_at)
            .expect("Failed to save");

        let loaded = repo.load(42).expect("Credential not found");
        assert_eq!(loaded.owner_id, 42);
        assert_eq!(loaded.access_token, "access-token-12345");
        assert_eq!(loaded.refresh_token, "refresh-token-67890");
        assert_eq!(loaded.expires_at.timestamp(), expires_at.timestamp());
    }

    #[test]
    fn test_load_nonexistent() {
        let repo = create_test_repository();
        assert!(repo.load(42).is_none());
        assert!(!repo.exists(42).unwrap());
    }

    #[test]
    fn test_tokens_are_encrypted_at_rest() {
        let repo = create_test_repository();
        repo.save(1, "plain-access", "plain-refresh", Utc::now())
            .unwrap();

        let stored = repo.fetch(1).unwrap().unwrap();
        assert_ne!(stored.access_token_cipher, "plain-access");
        assert_ne!(stored.refresh_token_cipher, "plain-refresh");
        assert!(!stored.access_token_cipher.contains("plain-access"));
    }

    #[test]
    fn test_save_overwrites() {
        let repo = create_test_repository();
        repo.save(1, "old-access", "old-refresh", Utc::now()).unwrap();

        let later = Utc::now() + ChronoDuration::hours(2);
        repo.save(1, "new-access", "new-refresh", later).unwrap();

        let loaded = repo.load(1).unwrap();
        assert_eq!(loaded.access_token, "new-access");
        assert_eq!(loaded.refresh_token, "new-refresh");
        assert_eq!(loaded.expires_at.timestamp(), later.timestamp());
    }

    #[test]
    fn test_delete() {
        let repo = create_test_repository();
        repo.save(1, "a", "r", Utc::now()).unwrap();

        assert!(repo.delete(1).unwrap());
        assert!(repo.load(1).is_none());

        // Deleting again should return false
        assert!(!repo.delete(1).unwrap());
    }

    #[test]
    fn test_owners_are_isolated() {
        let repo = create_test_repository();
        repo.save(1, "a1", "r1", Utc::now()).unwrap();
        repo.save(2, "a2", "r2", Utc::now()).unwrap();

        repo.delete(1).unwrap();
        assert_eq!(repo.load(2).unwrap().access_token, "a2");
    }

    #[test]
    fn test_wrong_key_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.db");

        CredentialRepository::new(&path, vault(0))
            .unwrap()
            .save(1, "a", "r", Utc::now())
            .unwrap();

        let other = CredentialRepository::new(&path, vault(1)).unwrap();
        assert!(other.load(1).is_none());
        // The row is still there for a later overwrite
        assert!(other.exists(1).unwrap());
    }

    #[test]
    fn test_corrupted_row_reads_as_absent() {
        let repo = create_test_repository();
        repo.save(1, "a", "r", Utc::now()).unwrap();

        repo.lock()
            .unwrap()
            .execute(
                "UPDATE credentials SET refresh_token_cipher = 'garbage' WHERE owner_id = 1",
                [],
            )
            .unwrap();

        assert!(repo.load(1).is_none());
    }

    #[test]
    fn test_rotate_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.db");
        let repo = CredentialRepository::new(&path, vault(0)).unwrap();
        repo.save(1, "a1", "r1", Utc::now()).unwrap();
        repo.save(2, "a2", "r2", Utc::now()).unwrap();

        let new_key = EncryptionVault::generate_key();
        assert_eq!(repo.rotate_key(&new_key).unwrap(), 2);

        // Old key no longer reads the rows
        assert!(repo.load(1).is_none());

        let rotated = CredentialRepository::new(&path, EncryptionVault::new(&new_key).unwrap()).unwrap();
        assert_eq!(rotated.load(1).unwrap().refresh_token, "r1");
        assert_eq!(rotated.load(2).unwrap().access_token, "a2");
    }

    #[test]
    fn test_rotate_key_is_all_or_nothing() {
        let repo = create_test_repository();
        repo.save(1, "a1", "r1", Utc::now()).unwrap();
        repo.lock()
            .unwrap()
            .execute(
                "INSERT INTO credentials VALUES (2, 'bad', 'bad', ?1, ?1, ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();

        assert!(repo.rotate_key(&EncryptionVault::generate_key()).is_err());

        // Row 1 still readable under the old key
        assert_eq!(repo.load(1).unwrap().access_token, "a1");
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let repo = create_test_repository();
        assert!(repo.save(1, "", "r", Utc::now()).is_err());
        assert!(repo.load(1).is_none());
    }
}
