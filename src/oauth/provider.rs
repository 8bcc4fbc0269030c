//! OAuth provider configuration.
//!
//! Defines the OAuth 2.0 endpoints and client registration used by both
//! processes.

use serde::{Deserialize, Serialize};

/// Spotify's authorization endpoint, used when none is configured.
pub const DEFAULT_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";

/// Spotify's token endpoint, used when none is configured.
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &[&str] = &[
    "user-read-currently-playing",
    "user-modify-playback-state",
    "user-read-playback-state",
    "playlist-modify-public",
    "playlist-modify-private",
];

/// OAuth provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OAuth authorization endpoint URL
    pub authorize_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Where the provider sends the user back (the callback server)
    pub redirect_uri: String,

    /// Required OAuth scopes
    pub scopes: Vec<String>,

    pub client_id: String,

    pub client_secret: String,
}

impl ProviderConfig {
    /// Build authorization URL carrying `state`.
    ///
    /// Deterministic: the same state always yields the same URL.
    pub fn build_auth_url(&self, state: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&state={}&scope={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(&scopes)
        )
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_provider(token_url: &str) -> ProviderConfig {
    ProviderConfig {
        authorize_url: "https://example.com/oauth/authorize".to_string(),
        token_url: token_url.to_string(),
        redirect_uri: "http://localhost:8080/spotify/callback".to_string(),
        scopes: vec!["read".to_string(), "write".to_string()],
        client_id: "test_client_id".to_string(),
        client_secret: "test_secret".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_auth_url() {
        let config = test_provider("https://example.com/oauth/token");

        let url = config.build_auth_url("random_state");

        assert!(url.starts_with("https://example.com/oauth/authorize?"));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fspotify%2Fcallback"));
        // URL encoding converts spaces to %20
        assert!(url.contains("scope=read%20write"));
        assert!(url.contains("state=random_state"));
    }

    #[test]
    fn test_build_auth_url_is_deterministic() {
        let config = test_provider("https://example.com/oauth/token");
        assert_eq!(config.build_auth_url("s"), config.build_auth_url("s"));
        assert_ne!(config.build_auth_url("s1"), config.build_auth_url("s2"));
    }

    #[test]
    fn test_state_is_encoded() {
        let config = test_provider("https://example.com/oauth/token");
        let url = config.build_auth_url("a&b=c");
        assert!(url.contains("state=a%26b%3Dc"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = test_provider("https://example.com/oauth/token");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("test_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
