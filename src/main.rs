use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanrelay::authorization::SimulatedAuthorizer;
use scanrelay::config::{AuthorizerConfig, RelayConfig};
use scanrelay::lifecycle::{self, ShutdownReason};
use scanrelay::state::AppState;
use scanrelay::{app, liveness};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanrelay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting scanrelay...");

    let config = RelayConfig::from_env();
    let authorizer = Arc::new(SimulatedAuthorizer::new(AuthorizerConfig::from_env()));
    let addr = config.bind_addr;
    let state = Arc::new(AppState::new(config, authorizer));

    lifecycle::install_panic_hook(state.shutdown.clone());
    tokio::spawn(lifecycle::listen_for_signals(state.shutdown.clone()));

    liveness::spawn_heartbeat_sweep(state.clone());
    liveness::spawn_eviction_sweep(state.clone());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on ws://{}/ws", addr);

    match app::serve(listener, state).await {
        Ok(ShutdownReason::Signal) => tracing::info!("Shutdown complete"),
        Ok(ShutdownReason::Fault) => {
            tracing::error!("Stopped after unhandled fault");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Forced shutdown: {}", e);
            std::process::exit(1);
        }
    }
}
