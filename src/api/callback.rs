//! Public OAuth callback endpoint.
//!
//! Runs in the callback-server process, which shares nothing with the bot
//! but the state store and the handoff table:
//! 1. Provider redirects here with `code` and `state`
//! 2. `state` is looked up in the shared store and consumed
//! 3. `code` is persisted as a handoff for the state's owner
//! 4. The browser is redirected into the chat with the handoff id
//!
//! The code is never exchanged here; the bot does that when the handoff
//! comes back.

use crate::handoff::HandoffStore;
use crate::oauth::StateManager;
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Terminal outcomes other than the redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPage {
    /// User declined on the provider's consent screen
    Declined,
    /// `code` or `state` missing
    InvalidRequest,
    /// Unknown, expired or already-used state
    SessionExpired,
    /// Handoff could not be persisted
    ServerError,
}

impl CallbackPage {
    fn status(self) -> StatusCode {
        match self {
            CallbackPage::Declined => StatusCode::OK,
            CallbackPage::InvalidRequest | CallbackPage::SessionExpired => StatusCode::BAD_REQUEST,
            CallbackPage::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(self) -> &'static str {
        match self {
            CallbackPage::Declined => "Authorization Denied",
            CallbackPage::InvalidRequest => "Invalid Request",
            CallbackPage::SessionExpired => "Session Expired",
            CallbackPage::ServerError => "Something Went Wrong",
        }
    }

    fn message(self) -> &'static str {
        match self {
            CallbackPage::Declined => {
                "You denied access to your account. If this was a mistake, send /login in the chat again."
            }
            CallbackPage::InvalidRequest => {
                "Missing required parameters. Please send /login in the chat again."
            }
            CallbackPage::SessionExpired => {
                "Your login session has expired. Please send /login in the chat again."
            }
            CallbackPage::ServerError => {
                "Failed to complete your login. Please send /login in the chat again."
            }
        }
    }
}

/// Page plus the chat link it points back to.
struct ErrorPage {
    page: CallbackPage,
    chat_link: String,
}

impl IntoResponse for ErrorPage {
    fn into_response(self) -> Response {
        let body = render_page(self.page.title(), self.page.message(), &self.chat_link);
        (self.page.status(), Html(body)).into_response()
    }
}

/// Shared state for the callback router
#[derive(Clone)]
pub struct CallbackAppState {
    pub states: StateManager,
    pub handoffs: Arc<HandoffStore>,
    pub handoff_ttl_seconds: u64,
    /// `https://t.me/<bot>`
    pub deep_link_base: String,
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

/// Create the callback router, serving the callback at `callback_path`.
pub fn create_callback_router(state: CallbackAppState, callback_path: &str) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route(callback_path, get(oauth_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn index() -> &'static str {
    "OAuth Callback Service"
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "oauth-callback",
    })
}

/// GET <callback_path>
///
/// # Security
/// - State is single-use: consumed before the handoff is written
/// - A forged or replayed state never produces a handoff
async fn oauth_callback(
    State(state): State<Arc<CallbackAppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(callback): Query<OAuthCallback>,
) -> Result<Redirect, ErrorPage> {
    let fail = |page: CallbackPage| ErrorPage {
        page,
        chat_link: state.deep_link_base.clone(),
    };

    debug!("OAuth callback received");

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "none".to_string());
        warn!(error = %error, description = %description, "User declined authorization");
        return Err(fail(CallbackPage::Declined));
    }

    let (code, csrf_token) = match (callback.code, callback.state) {
        (Some(code), Some(csrf)) if !code.is_empty() && !csrf.is_empty() => (code, csrf),
        _ => {
            warn!("Callback missing code or state parameter");
            return Err(fail(CallbackPage::InvalidRequest));
        }
    };

    let csrf_state = state.states.consume(&csrf_token).await.ok_or_else(|| {
        warn!("Invalid, expired or already used OAuth state");
        fail(CallbackPage::SessionExpired)
    })?;
    let owner_id = csrf_state.owner_id;

    let source_ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));

    let handoff = state
        .handoffs
        .create(owner_id, &code, &source_ip, state.handoff_ttl_seconds)
        .map_err(|e| {
            error!(owner_id, error = %e, "Failed to persist authorization handoff");
            fail(CallbackPage::ServerError)
        })?;

    info!(
        owner_id,
        handoff_id = %handoff.id,
        source_ip = %source_ip,
        "Handed off authorization code"
    );

    Ok(Redirect::to(&format!(
        "{}?start={}",
        state.deep_link_base, handoff.id
    )))
}

/// First `X-Forwarded-For` hop, else the socket peer, else `unknown`.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn render_page(title: &str, message: &str, chat_link: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        body {{ font-family: sans-serif; display: flex; justify-content: center; align-items: center; min-height: 100vh; margin: 0; }}
        .container {{ max-width: 500px; padding: 40px; text-align: center; }}
        a {{ display: inline-block; padding: 12px 24px; background: #0088cc; color: white; text-decoration: none; border-radius: 8px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{title}</h1>
        <p>{message}</p>
        <a href="{link}">Return to chat</a>
    </div>
</body>
</html>
"#,
        title = escape_html(title),
        message = escape_html(message),
        link = escape_html(chat_link),
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
