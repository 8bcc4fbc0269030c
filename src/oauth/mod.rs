//! OAuth 2.0 authorization-code flow against the provider.
//!
//! Implements the provider side of the login:
//! 1. Bot issues a CSRF state and sends the user the authorization URL
//! 2. User authorizes on the provider's site
//! 3. Provider redirects to the callback server with `code` and `state`
//! 4. Bot exchanges the code for tokens once the handoff comes back
//! 5. Access tokens are refreshed with the refresh token near expiry
//!
//! Provider failures are classified here and passed through unchanged:
//! `Network` and `TokenExchange` mean "try again shortly", while
//! `ReauthRequired` means the refresh token is dead and only a fresh login
//! helps.

mod exchange;
mod provider;
mod state;

pub use provider::{ProviderConfig, DEFAULT_AUTHORIZE_URL, DEFAULT_SCOPES, DEFAULT_TOKEN_URL};
pub use state::{CsrfState, StateError, StateManager, STATE_KEY_PREFIX};

#[cfg(test)]
pub(crate) use provider::test_provider;

use chrono::{DateTime, Utc};
use exchange::{EndpointError, Grant};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Provider error code for a dead refresh token.
const INVALID_GRANT: &str = "invalid_grant";

/// Errors from provider calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OAuthError {
    /// Transport failure or timeout
    #[error("network error talking to OAuth provider: {0}")]
    Network(String),
    /// Provider refused the grant or returned an unusable response
    #[error("token exchange failed: {reason}")]
    TokenExchange { reason: String },
    /// Refresh token rejected with `invalid_grant`; user must log in again
    #[error("refresh token rejected, re-authentication required")]
    ReauthRequired,
}

/// Tokens obtained from the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    /// Receipt time plus the provider-reported lifetime
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Client for the provider's authorization and token endpoints.
#[derive(Clone, Debug)]
pub struct OAuthClient {
    provider: ProviderConfig,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Creates a client whose token requests give up after `timeout`.
    pub fn new(provider: ProviderConfig, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;
        Ok(Self { provider, http })
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Authorization URL embedding `csrf_token` as `state`. No network call.
    pub fn build_authorization_url(&self, csrf_token: &str) -> String {
        self.provider.build_auth_url(csrf_token)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, OAuthError> {
        let received =
            exchange::request_token(&self.http, &self.provider, Grant::AuthorizationCode { code })
                .await
                .map_err(|e| match e {
                    EndpointError::Transport(msg) => {
                        error!(error = %msg, "Network error during token exchange");
                        OAuthError::Network(msg)
                    }
                    EndpointError::Rejected { status, reason, .. } => {
                        error!(status = %status, reason = %reason, "Token exchange rejected");
                        OAuthError::TokenExchange { reason }
                    }
                    EndpointError::Malformed(reason) => {
                        error!(reason = %reason, "Token exchange returned malformed response");
                        OAuthError::TokenExchange { reason }
                    }
                })?;

        let expires_at = received.expires_at;
        let response = received.response;

        let refresh_token = response.refresh_token.ok_or_else(|| {
            error!("Token exchange response has no refresh_token");
            OAuthError::TokenExchange {
                reason: "provider response is missing refresh_token".to_string(),
            }
        })?;

        info!(expires_at = %expires_at, "Exchanged authorization code for tokens");

        Ok(TokenSet {
            access_token: response.access_token,
            refresh_token,
            expires_at,
        })
    }

    /// Mint a new access token from `refresh_token`.
    ///
    /// When the provider does not rotate the refresh token, the one sent is
    /// returned so it keeps being persisted.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OAuthError> {
        let received = exchange::request_token(
            &self.http,
            &self.provider,
            Grant::RefreshToken { refresh_token },
        )
        .await
        .map_err(|e| match e {
            EndpointError::Transport(msg) => {
                error!(error = %msg, "Network error during token refresh");
                OAuthError::Network(msg)
            }
            EndpointError::Rejected { error, .. } if error.as_deref() == Some(INVALID_GRANT) => {
                warn!("Refresh token rejected with invalid_grant, re-authentication required");
                OAuthError::ReauthRequired
            }
            EndpointError::Rejected { status, reason, .. } => {
                error!(status = %status, reason = %reason, "Token refresh rejected");
                OAuthError::TokenExchange { reason }
            }
            EndpointError::Malformed(reason) => {
                error!(reason = %reason, "Token refresh returned malformed response");
                OAuthError::TokenExchange { reason }
            }
        })?;

        let expires_at = received.expires_at;
        let response = received.response;

        // Keep the existing refresh token if the provider did not rotate it
        let rotated = response.refresh_token.is_some();
        let refresh_token = response
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string());

        info!(rotated, expires_at = %expires_at, "Refreshed access token");

        Ok(TokenSet {
            access_token: response.access_token,
            refresh_token,
            expires_at,
        })
    }

    /// Best-effort token revocation.
    ///
    /// The provider has no revocation endpoint; tokens lapse on their own or
    /// when the user removes the app. Always reports success.
    pub async fn revoke(&self, _token: &str) -> bool {
        debug!("Token revocation requested; provider has no revocation endpoint");
        true
    }
}
