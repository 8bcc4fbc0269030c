//! OAuth state management for CSRF protection.
//!
//! States live only in the ephemeral store, keyed `oauth_state_<token>`, and
//! are consumed exactly once by the callback server.

use crate::store::StateStore;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Key prefix for CSRF states in the ephemeral store.
pub const STATE_KEY_PREFIX: &str = "oauth_state_";

/// Random bytes per state token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Longest token accepted from a callback before touching the store.
const MAX_TOKEN_LEN: usize = 128;

/// OAuth state entry bound to the chat user who started the login.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsrfState {
    pub token: String,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("state store did not accept the login state")]
    NotStored,
    #[error("failed to encode login state: {0}")]
    Encode(String),
}

/// Issues and consumes CSRF states over a [`StateStore`].
#[derive(Clone)]
pub struct StateManager {
    store: Arc<dyn StateStore>,
    ttl_seconds: u64,
}

impl StateManager {
    /// Create a new state manager
    ///
    /// # Arguments
    /// * `ttl_seconds` - How long states remain valid (default: 300 = 5 minutes)
    pub fn new(store: Arc<dyn StateStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Generate a new state token for `owner_id` and store it.
    pub async fn issue(&self, owner_id: i64) -> Result<CsrfState, StateError> {
        let created_at = Utc::now();
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        let state = CsrfState {
            token: generate_token(),
            owner_id,
            created_at,
            expires_at: created_at + Duration::seconds(ttl),
        };

        let encoded = serde_json::to_string(&state).map_err(|e| StateError::Encode(e.to_string()))?;

        if !self
            .store
            .set(&state_key(&state.token), &encoded, self.ttl_seconds)
            .await
        {
            warn!(owner_id, "Failed to store OAuth state");
            return Err(StateError::NotStored);
        }

        debug!(owner_id, "Issued OAuth state");
        Ok(state)
    }

    /// Validate and consume a state token.
    ///
    /// Returns the state if it exists and has not expired; `None` otherwise.
    /// The entry is deleted before it is returned, and a caller that loses
    /// the race to delete it gets `None`.
    pub async fn consume(&self, token: &str) -> Option<CsrfState> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return None;
        }

        let key = state_key(token);
        let raw = self.store.get(&key).await?;

        if !self.store.delete(&key).await {
            debug!("OAuth state already consumed by a concurrent request");
            return None;
        }

        let state: CsrfState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable OAuth state");
                return None;
            }
        };

        if state.token != token || state.expires_at <= Utc::now() {
            return None;
        }

        Some(state)
    }
}

fn state_key(token: &str) -> String {
    format!("{}{}", STATE_KEY_PREFIX, token)
}

/// URL-safe random token with 256 bits of entropy.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
