use std::sync::Arc;

use chatrelay_core::RelayConfig;
use chatrelay_engine::{Forwarder, RelayDispatcher, SessionRegistry};
use chatrelay_server::{AppState, ServerConfig};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let forwarder = Arc::new(Forwarder::new(config.webhook_url.clone()));
    let registry = SessionRegistry::new(config.idle_window, forwarder);
    let dispatcher = Arc::new(RelayDispatcher::new(Arc::clone(&registry), &config));

    let state = AppState {
        dispatcher,
        registry: Arc::clone(&registry),
    };

    let handle = chatrelay_server::start(ServerConfig { port: config.port }, state)
        .await
        .expect("Failed to start server");

    tracing::info!(
        port = handle.port,
        idle_minutes = config.idle_window.as_secs() / 60,
        "Relay ready"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
    registry.shutdown();
}
