use anyhow::{Context, Result};
use authbridge::api::{create_callback_router, CallbackAppState};
use authbridge::config::BridgeConfig;
use authbridge::handoff::HandoffStore;
use authbridge::oauth::StateManager;
use authbridge::store::{self, spawn_sweeper, StoreBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callback_server=info,authbridge=info,tower_http=info".into()),
        )
        .init();

    info!("Callback server starting...");

    let config = BridgeConfig::load().context("Failed to load configuration")?;
    let callback_path = config.callback_path();
    let bind_address = config.bind_address();

    info!(
        database_path = %config.storage.database_path,
        callback_path = %callback_path,
        bind_address = %bind_address,
        "Configuration loaded"
    );

    let state_store = store::connect(config.storage.state_store_path.as_deref());
    if state_store.backend() == StoreBackend::Local {
        warn!("Callback server is using a local state store; every login will read as expired");
    }

    let handoffs = Arc::new(
        HandoffStore::new(&config.storage.database_path)
            .context("Failed to initialize handoff store")?,
    );

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

    let app_state = CallbackAppState {
        states: StateManager::new(Arc::clone(&state_store), config.lifetimes.csrf_seconds),
        handoffs,
        handoff_ttl_seconds: config.lifetimes.handoff_seconds,
        deep_link_base: config.deep_link_base(),
    };
    let router = create_callback_router(app_state, &callback_path);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!(address = %bind_address, "Callback server listening");

    let server_handle = tokio::spawn(async move {
        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Callback server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    sweeper.shutdown().await;
    info!("Callback server stopped");

    Ok(())
}
