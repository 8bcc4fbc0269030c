//! Token endpoint requests.
//!
//! Both grants share one POST path; callers classify the outcome.

use super::provider::ProviderConfig;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

/// Lifetime assumed when the provider omits `expires_in`.
pub(super) const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
pub(super) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Structured error body (RFC 6749 section 5.2)
#[derive(Deserialize, Debug, Default)]
pub(super) struct ProviderErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

pub(super) enum Grant<'a> {
    AuthorizationCode { code: &'a str },
    RefreshToken { refresh_token: &'a str },
}

impl Grant<'_> {
    fn name(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// Outcome of a token endpoint call that did not succeed.
#[derive(Debug)]
pub(super) enum EndpointError {
    /// Request never completed (connect failure, timeout, body read)
    Transport(String),
    /// Provider answered non-2xx
    Rejected {
        status: StatusCode,
        error: Option<String>,
        reason: String,
    },
    /// 2xx with an unusable body
    Malformed(String),
}

/// A successful response plus its absolute expiry.
pub(super) struct Received {
    pub response: TokenResponse,
    pub expires_at: DateTime<Utc>,
}

/// Receipt time plus the reported lifetime, or `None` if the lifetime does
/// not fit a timestamp.
fn expiry(received_at: DateTime<Utc>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    let seconds = expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).max(0);
    received_at.checked_add_signed(chrono::Duration::try_seconds(seconds)?)
}

/// POST a grant to the provider's token endpoint.
pub(super) async fn request_token(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    grant: Grant<'_>,
) -> Result<Received, EndpointError> {
    let mut form: Vec<(&str, &str)> = vec![("grant_type", grant.name())];
    match &grant {
        Grant::AuthorizationCode { code } => {
            form.push(("code", *code));
            form.push(("redirect_uri", provider.redirect_uri.as_str()));
        }
        Grant::RefreshToken { refresh_token } => {
            form.push(("refresh_token", *refresh_token));
        }
    }
    form.push(("client_id", provider.client_id.as_str()));
    form.push(("client_secret", provider.client_secret.as_str()));

    tracing::debug!(
        grant_type = grant.name(),
        "Calling token endpoint at {}",
        provider.token_url
    );

    let response = http
        .post(&provider.token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| EndpointError::Transport(describe_transport_error(&e)))?;

    let received_at = Utc::now();
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| EndpointError::Transport(describe_transport_error(&e)))?;

    if !status.is_success() {
        let parsed: ProviderErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let reason = parsed
            .error_description
            .clone()
            .or_else(|| parsed.error.clone())
            .unwrap_or_else(|| fallback_reason(status, &body));
        return Err(EndpointError::Rejected {
            status,
            error: parsed.error,
            reason,
        });
    }

    let response: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| EndpointError::Malformed(format!("failed to parse token response: {}", e)))?;

    let expires_at = expiry(received_at, response.expires_in).ok_or_else(|| {
        EndpointError::Malformed(format!(
            "expires_in out of range: {:?}",
            response.expires_in
        ))
    })?;

    Ok(Received {
        response,
        expires_at,
    })
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else {
        e.to_string()
    }
}

fn fallback_reason(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("provider returned {}", status)
    } else {
        // Bodies can be whole HTML pages
        let snippet: String = body.chars().take(200).collect();
        format!("provider returned {}: {}", status, snippet)
    }
}
