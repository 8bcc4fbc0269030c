//! Encrypted credential storage for OAuth tokens.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialRepository               │
//! │  - save / load / delete / rotate_key     │
//! │  - transparent encryption/decryption     │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       EncryptionVault                    │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite Database                    │
//! │  - ciphertext only at rest               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A credential that cannot be decrypted (key mismatch, corruption) is
//! reported as absent: to callers a broken credential and no credential both
//! mean "not authenticated".

use chrono::{DateTime, Utc};

mod storage;

pub use storage::CredentialRepository;

/// A user's decrypted OAuth credential.
///
/// Only ever held transiently; the stored form carries ciphertext for both
/// tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub owner_id: i64,

    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: String,

    /// When the access token expires (UTC)
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True if the access token expires within `margin` of now.
    pub fn expires_within(&self, margin: chrono::Duration) -> bool {
        self.expires_at <= Utc::now() + margin
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("owner_id", &self.owner_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
