//! Authorization handoffs between the callback server and the bot.
//!
//! The callback server cannot talk to the bot directly. After validating a
//! redirect it persists the authorization code as an [`AuthorizationHandoff`]
//! and sends the user back into the chat with the handoff id; the bot then
//! looks the record up, deletes it, and exchanges the code.
//!
//! Records expire after a fixed TTL and are single-use whether or not the
//! exchange that follows succeeds.

use chrono::{DateTime, Utc};

mod storage;

pub use storage::HandoffStore;

/// A validated authorization code waiting for the bot to redeem it.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationHandoff {
    /// UUID v4, carried in the deep link
    pub id: String,
    pub owner_id: i64,
    pub code: String,
    pub source_ip: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AuthorizationHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationHandoff")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("code", &"<redacted>")
            .field("source_ip", &self.source_ip)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
