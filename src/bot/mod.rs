//! Chat-side handling of the login lifecycle.
//!
//! [`BotService`] dispatches the commands that touch OAuth and returns typed
//! [`Reply`] values. The transport that delivers messages and renders
//! replies lives outside this module (see [`console`]).

pub mod console;
mod handoff;

pub use handoff::{HandoffConsumer, HandoffError};

use crate::credentials::CredentialRepository;
use crate::handoff::HandoffStore;
use crate::middleware::{GateChain, Rejection};
use crate::oauth::{OAuthClient, StateError, StateManager};
use crate::users::{delete_account, UserStore, ValidationError};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// A parsed chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Login,
    /// `/start`, optionally carrying a deep-link payload
    Start(Option<String>),
    Logout,
    Status,
    /// Unrecognized slash command
    Unknown(String),
    /// Anything that is not a command
    Text(String),
}

impl ChatCommand {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if !text.starts_with('/') {
            return ChatCommand::Text(text.to_string());
        }

        let mut parts = text.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or_default();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        // Commands may be addressed as /login@botname
        let name = command.split('@').next().unwrap_or(command);
        match name {
            "/login" => ChatCommand::Login,
            "/start" => ChatCommand::Start(arg),
            "/logout" => ChatCommand::Logout,
            "/status" => ChatCommand::Status,
            _ => ChatCommand::Unknown(name.to_string()),
        }
    }
}

/// What the bot answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Welcome,
    AlreadyConnected,
    AuthorizationLink {
        url: String,
        expires_in_seconds: u64,
    },
    /// Login finished; asks for a display name when none is set
    Connected {
        needs_display_name: bool,
    },
    DisplayNameSaved(String),
    InvalidDisplayName(ValidationError),
    SessionExpired,
    /// Code exchange failed; the user has to start over
    LoginFailed,
    LoginRequired,
    TryAgainLater,
    Status {
        expires_at: Option<DateTime<Utc>>,
    },
    LoggedOut {
        had_data: bool,
    },
    Denied(String),
    UnknownCommand(String),
    NotUnderstood,
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Welcome => write!(f, "Welcome! Send /login to connect your account."),
            Reply::AlreadyConnected => write!(
                f,
                "Your account is already connected. Use /logout to disconnect it."
            ),
            Reply::AuthorizationLink {
                url,
                expires_in_seconds,
            } => write!(
                f,
                "Open this link to authorize access (expires in {} minutes):\n{}",
                expires_in_seconds / 60,
                url
            ),
            Reply::Connected {
                needs_display_name: true,
            } => write!(
                f,
                "Account connected! What should I call you? (1-12 characters)"
            ),
            Reply::Connected { .. } => write!(f, "Account connected!"),
            Reply::DisplayNameSaved(name) => write!(f, "Nice to meet you, {}!", name),
            Reply::InvalidDisplayName(e) => write!(f, "That name won't work: {}. Try again.", e),
            Reply::SessionExpired => {
                write!(f, "Your login session has expired. Please send /login again.")
            }
            Reply::LoginFailed => write!(
                f,
                "Could not complete the login. Please wait a moment and send /login again."
            ),
            Reply::LoginRequired => write!(f, "Please connect your account with /login first."),
            Reply::TryAgainLater => write!(f, "Something went wrong. Please try again shortly."),
            Reply::Status {
                expires_at: Some(expires_at),
            } => write!(f, "Connected. Access token valid until {}.", expires_at),
            Reply::Status { expires_at: None } => write!(f, "Connected."),
            Reply::LoggedOut { had_data: true } => {
                write!(f, "Your account and all stored data have been deleted.")
            }
            Reply::LoggedOut { had_data: false } => write!(f, "There was nothing to delete."),
            Reply::Denied(reason) => write!(f, "Request denied: {}", reason),
            Reply::UnknownCommand(command) => write!(f, "Unknown command {}.", command),
            Reply::NotUnderstood => write!(f, "Send /login to connect your account."),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Dependencies of [`BotService`], built once in `main`.
pub struct BotDeps {
    pub users: Arc<UserStore>,
    pub credentials: Arc<CredentialRepository>,
    pub handoffs: Arc<HandoffStore>,
    pub oauth: Arc<OAuthClient>,
    pub states: StateManager,
    /// Gates in front of commands that need a live credential
    pub gates: GateChain,
}

pub struct BotService {
    users: Arc<UserStore>,
    credentials: Arc<CredentialRepository>,
    handoffs: Arc<HandoffStore>,
    oauth: Arc<OAuthClient>,
    states: StateManager,
    gates: GateChain,
    consumer: HandoffConsumer,
    /// Owners whose next plain message is their display name
    awaiting_name: DashSet<i64>,
}

impl BotService {
    pub fn new(deps: BotDeps) -> Self {
        let consumer = HandoffConsumer::new(
            deps.handoffs.clone(),
            deps.oauth.clone(),
            deps.credentials.clone(),
        );
        Self {
            users: deps.users,
            credentials: deps.credentials,
            handoffs: deps.handoffs,
            oauth: deps.oauth,
            states: deps.states,
            gates: deps.gates,
            consumer,
            awaiting_name: DashSet::new(),
        }
    }

    /// Handles one message from `owner_id`.
    pub async fn handle(&self, owner_id: i64, text: &str) -> Reply {
        match ChatCommand::parse(text) {
            ChatCommand::Login => self.login(owner_id).await.unwrap_or_else(|e| {
                error!(owner_id, error = %e, "Failed to start login");
                Reply::TryAgainLater
            }),
            ChatCommand::Start(Some(handoff_id)) => self.complete_login(owner_id, &handoff_id).await,
            ChatCommand::Start(None) => self.welcome(owner_id),
            ChatCommand::Logout => self.logout(owner_id).await,
            ChatCommand::Status => self.status(owner_id).await,
            ChatCommand::Text(text) if self.awaiting_name.contains(&owner_id) => {
                self.save_display_name(owner_id, &text)
            }
            ChatCommand::Text(_) => Reply::NotUnderstood,
            ChatCommand::Unknown(command) => Reply::UnknownCommand(command),
        }
    }

    pub fn is_awaiting_display_name(&self, owner_id: i64) -> bool {
        self.awaiting_name.contains(&owner_id)
    }

    async fn login(&self, owner_id: i64) -> Result<Reply, LoginError> {
        // Only a usable credential counts; a dead or unreadable one is replaced
        let connected = match self.gates.run(owner_id, "/login").await {
            Ok(request) => {
                request.credential.is_some() || self.credentials.load(owner_id).is_some()
            }
            Err(Rejection::AuthRequired) => false,
            Err(Rejection::Transient(_)) => return Ok(Reply::TryAgainLater),
            Err(Rejection::Denied { reason, .. }) => return Ok(Reply::Denied(reason)),
        };
        if connected {
            return Ok(Reply::AlreadyConnected);
        }

        self.users.ensure(owner_id)?;
        let state = self.states.issue(owner_id).await?;
        let url = self.oauth.build_authorization_url(&state.token);

        info!(owner_id, "Sent authorization link");
        Ok(Reply::AuthorizationLink {
            url,
            expires_in_seconds: self.states.ttl_seconds(),
        })
    }

    async fn complete_login(&self, owner_id: i64, handoff_id: &str) -> Reply {
        match self.consumer.consume(handoff_id, owner_id).await {
            Ok(_) => {}
            Err(HandoffError::SessionExpired) => return Reply::SessionExpired,
            Err(e) => {
                warn!(owner_id, error = %e, "Login could not be completed");
                return Reply::LoginFailed;
            }
        }

        let needs_display_name = match self
            .users
            .ensure(owner_id)
            .and_then(|_| self.users.display_name(owner_id))
        {
            Ok(name) => name.is_none(),
            Err(e) => {
                error!(owner_id, error = %e, "Failed to read user record");
                false
            }
        };

        if needs_display_name {
            self.awaiting_name.insert(owner_id);
        }
        Reply::Connected { needs_display_name }
    }

    fn welcome(&self, owner_id: i64) -> Reply {
        if let Err(e) = self.users.ensure(owner_id) {
            error!(owner_id, error = %e, "Failed to create user record");
        }
        Reply::Welcome
    }

    fn save_display_name(&self, owner_id: i64, text: &str) -> Reply {
        match self.users.set_display_name(owner_id, text) {
            Ok(Ok(name)) => {
                self.awaiting_name.remove(&owner_id);
                Reply::DisplayNameSaved(name)
            }
            Ok(Err(e)) => Reply::InvalidDisplayName(e),
            Err(e) => {
                error!(owner_id, error = %e, "Failed to store display name");
                Reply::TryAgainLater
            }
        }
    }

    async fn logout(&self, owner_id: i64) -> Reply {
        self.awaiting_name.remove(&owner_id);
        match delete_account(
            owner_id,
            &self.users,
            &self.credentials,
            &self.handoffs,
            &self.oauth,
        )
        .await
        {
            Ok(had_data) => Reply::LoggedOut { had_data },
            Err(e) => {
                error!(owner_id, error = %e, "Account deletion failed");
                Reply::TryAgainLater
            }
        }
    }

    async fn status(&self, owner_id: i64) -> Reply {
        let gated = self
            .gates
            .handle(owner_id, "/status", |request| async move {
                Reply::Status {
                    expires_at: request.credential.map(|c| c.expires_at),
                }
            })
            .await;

        match gated {
            Ok(reply) => reply,
            Err(Rejection::AuthRequired) => Reply::LoginRequired,
            Err(Rejection::Transient(_)) => Reply::TryAgainLater,
            Err(Rejection::Denied { reason, .. }) => Reply::Denied(reason),
        }
    }
}
