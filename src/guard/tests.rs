use super::*;
use crate::oauth::test_provider;
use crate::vault::EncryptionVault;
use chrono::{Duration, Utc};
use serde_json::json;

fn repository() -> Arc<CredentialRepository> {
    let vault = EncryptionVault::new(&EncryptionVault::generate_key()).unwrap();
    Arc::new(CredentialRepository::new(":memory:", vault).unwrap())
}

fn guard_for(server: &mockito::ServerGuard, credentials: Arc<CredentialRepository>) -> AuthGuard {
    let oauth = OAuthClient::new(
        test_provider(&format!("{}/api/token", server.url())),
        std::time::Duration::from_secs(5),
    )
    .unwrap();
    AuthGuard::new(
        credentials,
        Arc::new(oauth),
        Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
    )
}

#[tokio::test]
async fn missing_credential_requires_auth() {
    let server = mockito::Server::new_async().await;
    let guard = guard_for(&server, repository());

    assert_eq!(guard.authorize(42).await, Err(GuardError::AuthRequired));
}

#[tokio::test]
async fn fresh_credential_makes_no_network_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/token")
        .expect(0)
        .create_async()
        .await;

    let credentials = repository();
    credentials
        .save(42, "access", "refresh", Utc::now() + Duration::minutes(30))
        .unwrap();

    let guard = guard_for(&server, credentials);
    let credential = guard.authorize(42).await.unwrap();
    assert_eq!(credential.access_token, "access");

    mock.assert_async().await;
}

#[tokio::test]
async fn near_expiry_credential_is_refreshed_and_persisted() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/token")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            mockito::Matcher::UrlEncoded("refresh_token".into(), "old-refresh".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"access_token": "new-access", "expires_in": 3600}).to_string())
        .expect(1)
        .create_async()
        .await;

    let credentials = repository();
    credentials
        .save(42, "old-access", "old-refresh", Utc::now() + Duration::minutes(3))
        .unwrap();

    let guard = guard_for(&server, credentials.clone());
    let credential = guard.authorize(42).await.unwrap();

    assert_eq!(credential.access_token, "new-access");
    // Provider did not rotate it
    assert_eq!(credential.refresh_token, "old-refresh");
    assert!(credential.expires_at > Utc::now() + Duration::minutes(55));

    let stored = credentials.load(42).unwrap();
    assert_eq!(stored.access_token, "new-access");
    assert_eq!(stored.refresh_token, "old-refresh");

    mock.assert_async().await;
}

#[tokio::test]
async fn invalid_grant_requires_auth_and_leaves_credential() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(json!({"error": "invalid_grant", "error_description": "Refresh token revoked"}).to_string())
        .create_async()
        .await;

    let credentials = repository();
    let expires_at = Utc::now() - Duration::minutes(1);
    credentials
        .save(42, "stale-access", "dead-refresh", expires_at)
        .unwrap();

    let guard = guard_for(&server, credentials.clone());
    assert_eq!(guard.authorize(42).await, Err(GuardError::AuthRequired));

    let stored = credentials.load(42).unwrap();
    assert_eq!(stored.access_token, "stale-access");
    assert_eq!(stored.refresh_token, "dead-refresh");
    assert_eq!(stored.expires_at.timestamp(), expires_at.timestamp());

    // A fresh login overwrites it cleanly
    credentials
        .save(42, "new-access", "new-refresh", Utc::now() + Duration::hours(1))
        .unwrap();
    assert_eq!(credentials.load(42).unwrap().refresh_token, "new-refresh");
}

#[tokio::test]
async fn provider_error_is_transient() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/token")
        .with_status(503)
        .with_body("Service Unavailable")
        .create_async()
        .await;

    let credentials = repository();
    credentials
        .save(42, "access", "refresh", Utc::now() + Duration::minutes(1))
        .unwrap();

    let guard = guard_for(&server, credentials.clone());
    assert!(matches!(
        guard.authorize(42).await,
        Err(GuardError::Transient(_))
    ));
    assert_eq!(credentials.load(42).unwrap().access_token, "access");
}

#[tokio::test]
async fn undecryptable_credential_requires_auth() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.db");

    let old_vault = EncryptionVault::new(&EncryptionVault::generate_key()).unwrap();
    CredentialRepository::new(&path, old_vault)
        .unwrap()
        .save(42, "a", "r", Utc::now() + Duration::hours(1))
        .unwrap();

    let new_vault = EncryptionVault::new(&EncryptionVault::generate_key()).unwrap();
    let credentials = Arc::new(CredentialRepository::new(&path, new_vault).unwrap());

    let server = mockito::Server::new_async().await;
    let guard = guard_for(&server, credentials);
    assert_eq!(guard.authorize(42).await, Err(GuardError::AuthRequired));
}
