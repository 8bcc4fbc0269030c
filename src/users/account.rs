use super::UserStore;
use crate::credentials::CredentialRepository;
use crate::handoff::HandoffStore;
use crate::oauth::OAuthClient;
use anyhow::Result;
use tracing::{info, warn};

/// Erases everything held for `owner_id`.
///
/// Order: best-effort token revocation, credential, outstanding handoffs,
/// user record. Returns true if anything existed.
pub async fn delete_account(
    owner_id: i64,
    users: &UserStore,
    credentials: &CredentialRepository,
    handoffs: &HandoffStore,
    oauth: &OAuthClient,
) -> Result<bool> {
    if let Some(credential) = credentials.load(owner_id) {
        if !oauth.revoke(&credential.access_token).await {
            warn!(owner_id, "Token revocation failed, deleting credential anyway");
        }
    }

    let had_credential = credentials.delete(owner_id)?;
    let handoffs_removed = handoffs.delete_for_owner(owner_id)?;
    let had_user = users.delete(owner_id)?;

    info!(
        owner_id,
        had_credential, handoffs_removed, had_user, "Deleted account"
    );
    Ok(had_credential || handoffs_removed > 0 || had_user)
}
