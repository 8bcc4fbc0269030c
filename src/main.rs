use anyhow::{bail, Context, Result};
use authbridge::bot::{console, BotDeps, BotService};
use authbridge::config::BridgeConfig;
use authbridge::credentials::CredentialRepository;
use authbridge::guard::AuthGuard;
use authbridge::handoff::HandoffStore;
use authbridge::middleware::{AuthGate, GateChain};
use authbridge::oauth::{OAuthClient, StateManager};
use authbridge::store::{self, spawn_sweeper};
use authbridge::users::UserStore;
use authbridge::vault::EncryptionVault;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authbridge=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run_bot().await,
        Some("generate-key") => {
            println!("{}", EncryptionVault::generate_key());
            Ok(())
        }
        Some("rotate-key") => {
            let new_key = args
                .get(1)
                .context("usage: authbridge rotate-key <new-base64-key>")?;
            rotate_key(new_key)
        }
        Some(other) => bail!("unknown command '{}'; expected generate-key or rotate-key", other),
    }
}

async fn run_bot() -> Result<()> {
    info!("Bot starting...");

    let config = BridgeConfig::load().context("Failed to load configuration")?;
    let vault = config.vault().context("Failed to load encryption key")?;

    info!(
        database_path = %config.storage.database_path,
        shared_state = config.storage.state_store_path.is_some(),
        "Configuration loaded"
    );

    if config.storage.state_store_path.is_none() {
        warn!("No shared state store configured; the callback server will not see login states");
    }

    let state_store = store::connect(config.storage.state_store_path.as_deref());
    let db_path = &config.storage.database_path;
    let credentials = Arc::new(
        CredentialRepository::new(db_path, vault)
            .context("Failed to initialize credential repository")?,
    );
    let handoffs =
        Arc::new(HandoffStore::new(db_path).context("Failed to initialize handoff store")?);
    let users = Arc::new(UserStore::new(db_path).context("Failed to initialize user store")?);
    let oauth = Arc::new(
        OAuthClient::new(config.provider(), config.http_timeout())
            .context("Failed to build HTTP client")?,
    );
    let states = StateManager::new(Arc::clone(&state_store), config.lifetimes.csrf_seconds);

    let guard = AuthGuard::new(
        Arc::clone(&credentials),
        Arc::clone(&oauth),
        config.refresh_margin(),
    );
    let gates = GateChain::new().with(Arc::new(AuthGate::new(guard)));

    let sweeper = {
        let state_store = Arc::clone(&state_store);
        let handoffs = Arc::clone(&handoffs);
        spawn_sweeper(config.sweep_interval(), move || {
            let state_store = Arc::clone(&state_store);
            let handoffs = Arc::clone(&handoffs);
            async move {
                let states = state_store.purge_expired().await;
                let expired = handoffs.purge_expired().unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to purge expired handoffs");
                    0
                });
                states + expired
            }
        })
    };

    let service = BotService::new(BotDeps {
        users,
        credentials,
        handoffs,
        oauth,
        states,
        gates,
    });

    info!(backend = %state_store.backend(), "Bot ready; reading '<owner_id> <message>' lines from stdin");

    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();
    tokio::select! {
        result = console::run(&service, input, output) => {
            result?;
            info!("Input closed");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl_c signal")?;
            info!("Shutdown signal received");
        }
    }

    sweeper.shutdown().await;
    info!("Bot stopped");
    Ok(())
}

/// Re-encrypts every stored credential under `new_key`.
fn rotate_key(new_key: &str) -> Result<()> {
    EncryptionVault::new(new_key).context("New key is invalid")?;

    let config = BridgeConfig::load().context("Failed to load configuration")?;
    let vault = config.vault().context("Failed to load current encryption key")?;
    let credentials = CredentialRepository::new(&config.storage.database_path, vault)
        .context("Failed to initialize credential repository")?;

    let rotated = credentials
        .rotate_key(new_key)
        .context("Key rotation failed; no credentials were changed")?;

    info!(rotated, "Key rotation complete; restart both processes with the new key");
    Ok(())
}
