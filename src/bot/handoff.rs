//! Bot-side redemption of authorization handoffs.

use crate::credentials::CredentialRepository;
use crate::handoff::HandoffStore;
use crate::oauth::{OAuthClient, OAuthError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandoffError {
    /// Handoff missing, expired, already used, or not this user's
    #[error("login session expired")]
    SessionExpired,
    #[error(transparent)]
    Exchange(#[from] OAuthError),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Turns a handoff id from a deep link into a stored credential.
#[derive(Clone)]
pub struct HandoffConsumer {
    handoffs: Arc<HandoffStore>,
    oauth: Arc<OAuthClient>,
    credentials: Arc<CredentialRepository>,
}

impl HandoffConsumer {
    pub fn new(
        handoffs: Arc<HandoffStore>,
        oauth: Arc<OAuthClient>,
        credentials: Arc<CredentialRepository>,
    ) -> Self {
        Self {
            handoffs,
            oauth,
            credentials,
        }
    }

    /// Redeems `handoff_id` for `owner_id`, returning the new token expiry.
    ///
    /// The handoff is deleted before the code is exchanged, so it is spent
    /// whatever the outcome. A caller that loses the delete to a concurrent
    /// redemption gets `SessionExpired`.
    pub async fn consume(
        &self,
        handoff_id: &str,
        owner_id: i64,
    ) -> Result<DateTime<Utc>, HandoffError> {
        let handoff = self
            .handoffs
            .find(handoff_id)
            .map_err(|e| {
                error!(owner_id, error = %e, "Failed to read handoff");
                HandoffError::Storage(e.to_string())
            })?
            .ok_or_else(|| {
                warn!(owner_id, handoff_id, "Handoff not found or expired");
                HandoffError::SessionExpired
            })?;

        let removed = self.handoffs.delete(&handoff.id).map_err(|e| {
            error!(owner_id, error = %e, "Failed to delete handoff");
            HandoffError::Storage(e.to_string())
        })?;
        if !removed {
            warn!(owner_id, handoff_id, "Handoff already redeemed");
            return Err(HandoffError::SessionExpired);
        }

        if handoff.owner_id != owner_id {
            warn!(
                owner_id,
                handoff_owner = handoff.owner_id,
                handoff_id,
                "Handoff presented by a different user, discarded"
            );
            return Err(HandoffError::SessionExpired);
        }

        let tokens = self.oauth.exchange_code(&handoff.code).await?;

        self.credentials
            .save(
                owner_id,
                &tokens.access_token,
                &tokens.refresh_token,
                tokens.expires_at,
            )
            .map_err(|e| {
                error!(owner_id, error = %e, "Failed to save credential");
                HandoffError::Storage(e.to_string())
            })?;

        info!(owner_id, expires_at = %tokens.expires_at, "Login completed");
        Ok(tokens.expires_at)
    }
}
