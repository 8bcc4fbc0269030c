//! Startup configuration shared by both processes.
//!
//! Loaded once: optional TOML file named by `AUTHBRIDGE_CONFIG`, then
//! `AUTHBRIDGE_*` environment overrides, then validation. Nothing is
//! reloaded at runtime.

use crate::oauth::{ProviderConfig, DEFAULT_AUTHORIZE_URL, DEFAULT_SCOPES, DEFAULT_TOKEN_URL};
use crate::vault::{CryptoError, EncryptionVault};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Env var naming the optional TOML file.
pub const CONFIG_PATH_ENV: &str = "AUTHBRIDGE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("invalid encryption key: {0}")]
    Key(#[from] CryptoError),
}

/// Complete configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub bot: BotSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub callback: CallbackSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub lifetimes: LifetimeSettings,
}

/// OAuth application registration
#[derive(Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_authorize_url() -> String {
    DEFAULT_AUTHORIZE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
        }
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct SecuritySettings {
    /// Base64-encoded 32-byte key
    #[serde(default)]
    pub encryption_key: String,
}

impl std::fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("encryption_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotSettings {
    /// Chat bot username used to build deep links
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Document store holding credentials, handoffs and users
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Shared state backend; unset means process-local
    #[serde(default)]
    pub state_store_path: Option<String>,
}

fn default_database_path() -> String {
    "authbridge.db".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            state_store_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Lifetimes of the flow's moving parts, in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct LifetimeSettings {
    #[serde(default = "default_csrf_seconds")]
    pub csrf_seconds: u64,
    #[serde(default = "default_handoff_seconds")]
    pub handoff_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Refresh tokens expiring within this window
    #[serde(default = "default_refresh_margin_seconds")]
    pub refresh_margin_seconds: u64,
}

fn default_csrf_seconds() -> u64 {
    300
}

fn default_handoff_seconds() -> u64 {
    600
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_refresh_margin_seconds() -> u64 {
    300
}

impl Default for LifetimeSettings {
    fn default() -> Self {
        Self {
            csrf_seconds: default_csrf_seconds(),
            handoff_seconds: default_handoff_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            refresh_margin_seconds: default_refresh_margin_seconds(),
        }
    }
}

impl BridgeConfig {
    /// Loads from `AUTHBRIDGE_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML file. Missing sections take their defaults.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Applies `AUTHBRIDGE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AUTHBRIDGE_CLIENT_ID") {
            self.provider.client_id = v;
        }
        if let Some(v) = get("AUTHBRIDGE_CLIENT_SECRET") {
            self.provider.client_secret = v;
        }
        if let Some(v) = get("AUTHBRIDGE_REDIRECT_URI") {
            self.provider.redirect_uri = v;
        }
        if let Some(v) = get("AUTHBRIDGE_AUTHORIZE_URL") {
            self.provider.authorize_url = v;
        }
        if let Some(v) = get("AUTHBRIDGE_TOKEN_URL") {
            self.provider.token_url = v;
        }
        if let Some(v) = get("AUTHBRIDGE_SCOPES") {
            self.provider.scopes = v
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("AUTHBRIDGE_ENCRYPTION_KEY") {
            self.security.encryption_key = v;
        }
        if let Some(v) = get("AUTHBRIDGE_BOT_USERNAME") {
            self.bot.username = v.trim_start_matches('@').to_string();
        }
        if let Some(v) = get("AUTHBRIDGE_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = get("AUTHBRIDGE_STATE_STORE_PATH") {
            self.storage.state_store_path = Some(v);
        }
        if let Some(v) = get("AUTHBRIDGE_CALLBACK_HOST") {
            self.callback.host = v;
        }
        if let Some(v) = get("AUTHBRIDGE_CALLBACK_PORT") {
            self.callback.port = v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "AUTHBRIDGE_CALLBACK_PORT",
                reason: format!("'{}' is not a port number", v),
            })?;
        }
        if let Some(v) = get("AUTHBRIDGE_HTTP_TIMEOUT_SECONDS") {
            self.http.timeout_seconds = v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "AUTHBRIDGE_HTTP_TIMEOUT_SECONDS",
                reason: format!("'{}' is not a number of seconds", v),
            })?;
        }

        Ok(())
    }

    /// Checks required settings and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("AUTHBRIDGE_CLIENT_ID", &self.provider.client_id)?;
        require("AUTHBRIDGE_CLIENT_SECRET", &self.provider.client_secret)?;
        require("AUTHBRIDGE_REDIRECT_URI", &self.provider.redirect_uri)?;
        require("AUTHBRIDGE_ENCRYPTION_KEY", &self.security.encryption_key)?;
        require("AUTHBRIDGE_BOT_USERNAME", &self.bot.username)?;

        reqwest::Url::parse(&self.provider.redirect_uri).map_err(|e| ConfigError::Invalid {
            key: "AUTHBRIDGE_REDIRECT_URI",
            reason: e.to_string(),
        })?;
        for (key, url) in [
            ("AUTHBRIDGE_AUTHORIZE_URL", &self.provider.authorize_url),
            ("AUTHBRIDGE_TOKEN_URL", &self.provider.token_url),
        ] {
            reqwest::Url::parse(url).map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })?;
        }
        if self.provider.scopes.is_empty() {
            return Err(ConfigError::Invalid {
                key: "AUTHBRIDGE_SCOPES",
                reason: "at least one scope is required".to_string(),
            });
        }
        if self.http.timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "AUTHBRIDGE_HTTP_TIMEOUT_SECONDS",
                reason: "must be greater than zero".to_string(),
            });
        }
        let lifetimes = &self.lifetimes;
        if lifetimes.csrf_seconds == 0
            || lifetimes.handoff_seconds == 0
            || lifetimes.sweep_interval_seconds == 0
        {
            return Err(ConfigError::Invalid {
                key: "lifetimes",
                reason: "lifetimes and sweep interval must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Vault over the configured key. A bad key is fatal at startup.
    pub fn vault(&self) -> Result<EncryptionVault, ConfigError> {
        Ok(EncryptionVault::new(&self.security.encryption_key)?)
    }

    pub fn provider(&self) -> ProviderConfig {
        ProviderConfig {
            authorize_url: self.provider.authorize_url.clone(),
            token_url: self.provider.token_url.clone(),
            redirect_uri: self.provider.redirect_uri.clone(),
            scopes: self.provider.scopes.clone(),
            client_id: self.provider.client_id.clone(),
            client_secret: self.provider.client_secret.clone(),
        }
    }

    /// Path component of the redirect URI, where the callback is served.
    pub fn callback_path(&self) -> String {
        reqwest::Url::parse(&self.provider.redirect_uri)
            .ok()
            .map(|url| url.path().to_string())
            .filter(|path| path.len() > 1)
            .unwrap_or_else(|| "/callback".to_string())
    }

    /// Chat deep link prefix; the handoff id is appended as `start`.
    pub fn deep_link_base(&self) -> String {
        format!("https://t.me/{}", self.bot.username)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.callback.host, self.callback.port)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.lifetimes.sweep_interval_seconds)
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.lifetimes.refresh_margin_seconds).unwrap_or(i64::MAX / 1000),
        )
    }
}

fn require(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(key))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn required_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("AUTHBRIDGE_CLIENT_ID", "client".to_string()),
            ("AUTHBRIDGE_CLIENT_SECRET", "secret".to_string()),
            (
                "AUTHBRIDGE_REDIRECT_URI",
                "https://auth.example.com/spotify/callback".to_string(),
            ),
            ("AUTHBRIDGE_ENCRYPTION_KEY", EncryptionVault::generate_key()),
            ("AUTHBRIDGE_BOT_USERNAME", "@example_bot".to_string()),
        ])
    }

    fn config_from(env: &HashMap<&'static str, String>) -> Result<BridgeConfig, ConfigError> {
        let mut config = BridgeConfig::default();
        config.apply_overrides(|key| env.get(key).cloned())?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.storage.database_path, "authbridge.db");
        assert_eq!(config.storage.state_store_path, None);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.http.timeout_seconds, 30);
        assert_eq!(config.lifetimes.csrf_seconds, 300);
        assert_eq!(config.lifetimes.handoff_seconds, 600);
        assert_eq!(config.lifetimes.sweep_interval_seconds, 60);
        assert_eq!(config.lifetimes.refresh_margin_seconds, 300);
        assert_eq!(config.provider.token_url, DEFAULT_TOKEN_URL);
        assert!(!config.provider.scopes.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut env = required_env();
        env.insert("AUTHBRIDGE_SCOPES", "a, b c".to_string());
        env.insert("AUTHBRIDGE_STATE_STORE_PATH", "/tmp/state.db".to_string());
        env.insert("AUTHBRIDGE_CALLBACK_PORT", "9000".to_string());

        let config = config_from(&env).unwrap();
        assert_eq!(config.provider.scopes, vec!["a", "b", "c"]);
        assert_eq!(config.storage.state_store_path.as_deref(), Some("/tmp/state.db"));
        assert_eq!(config.callback.port, 9000);
        assert_eq!(config.bot.username, "example_bot");
        assert_eq!(config.deep_link_base(), "https://t.me/example_bot");
        assert_eq!(config.callback_path(), "/spotify/callback");
        assert!(config.vault().is_ok());
    }

    #[test]
    fn test_missing_required_setting() {
        let mut env = required_env();
        env.remove("AUTHBRIDGE_ENCRYPTION_KEY");

        assert!(matches!(
            config_from(&env),
            Err(ConfigError::Missing("AUTHBRIDGE_ENCRYPTION_KEY"))
        ));
    }

    #[test]
    fn test_invalid_values() {
        let mut env = required_env();
        env.insert("AUTHBRIDGE_CALLBACK_PORT", "eighty".to_string());
        assert!(matches!(
            config_from(&env),
            Err(ConfigError::Invalid { key: "AUTHBRIDGE_CALLBACK_PORT", .. })
        ));

        let mut env = required_env();
        env.insert("AUTHBRIDGE_REDIRECT_URI", "not a url".to_string());
        assert!(matches!(
            config_from(&env),
            Err(ConfigError::Invalid { key: "AUTHBRIDGE_REDIRECT_URI", .. })
        ));
    }

    #[test]
    fn test_bad_key_is_rejected() {
        let mut env = required_env();
        env.insert("AUTHBRIDGE_ENCRYPTION_KEY", "c2hvcnQ=".to_string());

        let config = config_from(&env).unwrap();
        assert!(matches!(config.vault(), Err(ConfigError::Key(_))));
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [provider]
            client_id = "file-client"
            scopes = ["user-read-email"]

            [storage]
            database_path = "/var/lib/authbridge/bridge.db"
            state_store_path = "/var/lib/authbridge/state.db"

            [lifetimes]
            csrf_seconds = 120
            refresh_margin_seconds = 600
        "#;

        let config: BridgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.provider.client_id, "file-client");
        assert_eq!(config.provider.scopes, vec!["user-read-email"]);
        assert_eq!(config.provider.authorize_url, DEFAULT_AUTHORIZE_URL);
        assert_eq!(config.storage.database_path, "/var/lib/authbridge/bridge.db");
        assert_eq!(config.lifetimes.csrf_seconds, 120);
        assert_eq!(config.lifetimes.handoff_seconds, 600);
        assert_eq!(config.refresh_margin(), chrono::Duration::minutes(10));
        assert_eq!(config.callback.port, 8080);
    }

    #[test]
    fn test_from_file_and_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authbridge.toml");
        std::fs::write(&path, "[provider]\nclient_id = \"file-client\"\n").unwrap();

        let mut config = BridgeConfig::from_file(path.to_str().unwrap()).unwrap();
        config
            .apply_overrides(|key| required_env().get(key).cloned())
            .unwrap();
        assert_eq!(config.provider.client_id, "client");
    }

    #[test]
    fn test_unreadable_file() {
        assert!(matches!(
            BridgeConfig::from_file("/nonexistent/authbridge.toml"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = config_from(&required_env()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret\""));
        assert!(!debug.contains(&config.security.encryption_key));
    }
}
