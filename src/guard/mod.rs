//! Request-time credential check with proactive refresh.

use crate::credentials::{Credential, CredentialRepository};
use crate::oauth::{OAuthClient, OAuthError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[cfg(test)]
mod tests;

/// Default window before expiry in which a token is refreshed.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// No usable credential; the user has to log in
    #[error("authentication required")]
    AuthRequired,
    /// Refresh failed in a way worth retrying
    #[error("temporary authentication failure: {0}")]
    Transient(String),
}

/// Ensures a caller holds a live credential before a handler runs.
///
/// Check-then-refresh is not locked. Two requests from the same user near
/// expiry may both refresh; the later save wins.
#[derive(Clone)]
pub struct AuthGuard {
    credentials: Arc<CredentialRepository>,
    oauth: Arc<OAuthClient>,
    refresh_margin: chrono::Duration,
}

impl AuthGuard {
    pub fn new(
        credentials: Arc<CredentialRepository>,
        oauth: Arc<OAuthClient>,
        refresh_margin: chrono::Duration,
    ) -> Self {
        Self {
            credentials,
            oauth,
            refresh_margin,
        }
    }

    /// Returns a credential valid for at least the refresh margin.
    ///
    /// # Errors
    /// * `AuthRequired` - no credential, or the provider rejected the refresh token
    /// * `Transient` - refresh failed on the network or the provider side
    pub async fn authorize(&self, owner_id: i64) -> Result<Credential, GuardError> {
        let credential = self
            .credentials
            .load(owner_id)
            .ok_or(GuardError::AuthRequired)?;

        if !credential.expires_within(self.refresh_margin) {
            debug!(owner_id, "Credential fresh, no refresh needed");
            return Ok(credential);
        }

        debug!(owner_id, expires_at = %credential.expires_at, "Credential near expiry, refreshing");

        let tokens = match self.oauth.refresh(&credential.refresh_token).await {
            Ok(tokens) => tokens,
            Err(OAuthError::ReauthRequired) => {
                // Stale credential stays; the next login overwrites it
                warn!(owner_id, "Refresh token rejected, login required");
                return Err(GuardError::AuthRequired);
            }
            Err(e) => {
                warn!(owner_id, error = %e, "Token refresh failed");
                return Err(GuardError::Transient(e.to_string()));
            }
        };

        if let Err(e) = self.credentials.save(
            owner_id,
            &tokens.access_token,
            &tokens.refresh_token,
            tokens.expires_at,
        ) {
            error!(owner_id, error = %e, "Failed to persist refreshed credential");
        } else {
            info!(owner_id, expires_at = %tokens.expires_at, "Refreshed credential");
        }

        Ok(Credential {
            owner_id,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_at,
        })
    }
}
