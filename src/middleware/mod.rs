//! Gates run in front of bot command handlers.
//!
//! A [`GateChain`] runs its gates in the order they were added and stops at
//! the first rejection. The handler only runs once every gate has passed,
//! and receives the [`GatedRequest`] the gates filled in.

use crate::credentials::Credential;
use crate::guard::{AuthGuard, GuardError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Request as seen by gates and, after them, the handler.
#[derive(Debug, Clone)]
pub struct GatedRequest {
    pub owner_id: i64,
    pub command: String,
    /// Set by [`AuthGate`]
    pub credential: Option<Credential>,
}

impl GatedRequest {
    pub fn new(owner_id: i64, command: impl Into<String>) -> Self {
        Self {
            owner_id,
            command: command.into(),
            credential: None,
        }
    }
}

/// Why a gate stopped a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("login required")]
    AuthRequired,
    #[error("temporarily unavailable: {0}")]
    Transient(String),
    #[error("denied by {gate}: {reason}")]
    Denied { gate: &'static str, reason: String },
}

impl From<GuardError> for Rejection {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::AuthRequired => Rejection::AuthRequired,
            GuardError::Transient(msg) => Rejection::Transient(msg),
        }
    }
}

#[async_trait]
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspects and may enrich the request. An error stops the chain.
    async fn check(&self, request: &mut GatedRequest) -> Result<(), Rejection>;
}

/// Ordered list of gates.
#[derive(Clone, Default)]
pub struct GateChain {
    gates: Vec<Arc<dyn Gate>>,
}

impl GateChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a gate; gates run in insertion order.
    pub fn with(mut self, gate: Arc<dyn Gate>) -> Self {
        self.gates.push(gate);
        self
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Runs every gate against a fresh request.
    pub async fn run(
        &self,
        owner_id: i64,
        command: &str,
    ) -> Result<GatedRequest, Rejection> {
        let mut request = GatedRequest::new(owner_id, command);
        for gate in &self.gates {
            if let Err(rejection) = gate.check(&mut request).await {
                debug!(owner_id, gate = gate.name(), %rejection, "Request rejected");
                return Err(rejection);
            }
        }
        Ok(request)
    }

    /// Runs the gates, then `handler` if all of them passed.
    pub async fn handle<F, Fut, T>(
        &self,
        owner_id: i64,
        command: &str,
        handler: F,
    ) -> Result<T, Rejection>
    where
        F: FnOnce(GatedRequest) -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        let request = self.run(owner_id, command).await?;
        Ok(handler(request).await)
    }
}

/// Gate requiring a live credential.
pub struct AuthGate {
    guard: AuthGuard,
}

impl AuthGate {
    pub fn new(guard: AuthGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Gate for AuthGate {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn check(&self, request: &mut GatedRequest) -> Result<(), Rejection> {
        let credential = self.guard.authorize(request.owner_id).await?;
        request.credential = Some(credential);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialRepository;
    use crate::oauth::{test_provider, OAuthClient};
    use crate::vault::EncryptionVault;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGate {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Gate for CountingGate {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn check(&self, _request: &mut GatedRequest) -> Result<(), Rejection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct DenyGate;

    #[async_trait]
    impl Gate for DenyGate {
        fn name(&self) -> &'static str {
            "deny"
        }

        async fn check(&self, _request: &mut GatedRequest) -> Result<(), Rejection> {
            Err(Rejection::Denied {
                gate: "deny",
                reason: "blocked".to_string(),
            })
        }
    }

    fn auth_gate(credentials: Arc<CredentialRepository>) -> Arc<dyn Gate> {
        let oauth = OAuthClient::new(
            test_provider("http://127.0.0.1:9/api/token"),
            std::time::Duration::from_secs(1),
        )
        .unwrap();
        Arc::new(AuthGate::new(AuthGuard::new(
            credentials,
            Arc::new(oauth),
            Duration::minutes(5),
        )))
    }

    fn repository() -> Arc<CredentialRepository> {
        let vault = EncryptionVault::new(&EncryptionVault::generate_key()).unwrap();
        Arc::new(CredentialRepository::new(":memory:", vault).unwrap())
    }

    #[tokio::test]
    async fn test_empty_chain_runs_handler() {
        let chain = GateChain::new();
        let result = chain.handle(1, "/status", |req| async move { req.owner_id }).await;
        assert_eq!(result, Ok(1));
    }

    #[tokio::test]
    async fn test_rejection_stops_chain_and_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = GateChain::new()
            .with(Arc::new(CountingGate { calls: calls.clone() }))
            .with(Arc::new(DenyGate))
            .with(Arc::new(CountingGate { calls: calls.clone() }));
        assert_eq!(chain.len(), 3);

        let handled = Arc::new(AtomicUsize::new(0));
        let handled_in = handled.clone();
        let result = chain
            .handle(1, "/status", |_| async move {
                handled_in.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(Rejection::Denied { gate: "deny", .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_gate_rejects_without_credential() {
        let chain = GateChain::new().with(auth_gate(repository()));
        assert_eq!(chain.run(42, "/status").await.unwrap_err(), Rejection::AuthRequired);
    }

    #[tokio::test]
    async fn test_auth_gate_attaches_credential() {
        let credentials = repository();
        credentials
            .save(42, "access", "refresh", Utc::now() + Duration::hours(1))
            .unwrap();

        let chain = GateChain::new().with(auth_gate(credentials));
        let request = chain.run(42, "/status").await.unwrap();

        assert_eq!(request.command, "/status");
        assert_eq!(request.credential.unwrap().access_token, "access");
    }

    #[test]
    fn test_guard_errors_map_to_rejections() {
        assert_eq!(Rejection::from(GuardError::AuthRequired), Rejection::AuthRequired);
        assert_eq!(
            Rejection::from(GuardError::Transient("timeout".to_string())),
            Rejection::Transient("timeout".to_string())
        );
    }
}
