use auth_broker::config::BrokerConfig;
use auth_broker::state::AppState;
use auth_broker::{cache, create_app};
use log::{error, info};
use std::net::SocketAddr;

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("Auth broker stopped");
}

async fn run() -> Result<(), String> {
    let config = BrokerConfig::new().map_err(|e| format!("Configuration error: {e}"))?;
    let cache = cache::create_cache(&config.cache)
        .await
        .map_err(|e| format!("Failed to initialize credential cache: {e}"))?;
    info!(
        "Caching credentials in the '{}' store for application '{}'",
        cache.store_name(),
        config.application_id
    );
    let state = AppState::with_existing_cache(&config, cache)
        .map_err(|e| format!("Failed to initialize application state: {e}"))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {addr}: {e}"))?;

    info!("Auth broker listening on {}", addr);
    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("Server error: {e}"))
}

/// Resolves on Ctrl+C or SIGTERM; a signal that cannot be installed never fires
async fn shutdown_signal() {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, shutting down");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}
