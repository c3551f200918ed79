use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use dcrbridge::{MemoryBackend, WalletManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use super::handlers;
use crate::config::{BackendMode, ServerConfig};

/// Routes over a shared manager, without CORS
pub fn router(manager: Arc<WalletManager>) -> Router {
    Router::new()
        // Accounts and addresses
        .route(
            "/api/accounts",
            get(handlers::list_accounts_handler).post(handlers::create_account_handler),
        )
        .route(
            "/api/accounts/by-name/:name",
            get(handlers::account_by_name_handler),
        )
        .route(
            "/api/accounts/:account/balance",
            get(handlers::account_balance_handler),
        )
        .route(
            "/api/accounts/:account/addresses",
            post(handlers::next_address_handler),
        )
        .route(
            "/api/accounts/:account/unspent",
            get(handlers::unspent_handler),
        )
        .route("/api/addresses/:address", get(handlers::address_info_handler))
        .route(
            "/api/addresses/:address/validate",
            get(handlers::validate_address_handler),
        )
        // Sending
        .route("/api/send", post(handlers::send_handler))
        .route("/api/send/utxos", post(handlers::send_utxos_handler))
        // History and chain state
        .route("/api/transactions", get(handlers::history_handler))
        .route("/api/transactions/:hash", get(handlers::transaction_handler))
        .route("/api/blocks/best", get(handlers::best_block_handler))
        .route("/api/connection", get(handlers::connection_handler))
        // Sync
        .route(
            "/api/sync",
            get(handlers::sync_status_handler).post(handlers::start_sync_handler),
        )
        .route("/api/sync/cancel", post(handlers::cancel_sync_handler))
        .route("/api/sync/rescan", post(handlers::rescan_handler))
        .route(
            "/api/sync/transactions",
            get(handlers::indexed_transactions_handler),
        )
        .with_state(manager)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("⚠️  Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        log::warn!("CORS: Allowing all origins (development mode). Set ALLOWED_ORIGINS env var for production.");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        log::info!("CORS configured for {} origin(s)", origins.len());
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn build_manager(config: &ServerConfig, shutdown: &CancellationToken) -> anyhow::Result<WalletManager> {
    let manager = match config.backend_mode {
        BackendMode::Remote => WalletManager::connect(config.bridge.clone(), shutdown).await?,
        BackendMode::Embedded => {
            let backend = Arc::new(MemoryBackend::new(config.bridge.network));
            WalletManager::new(backend, config.bridge.clone())
        }
    };
    Ok(manager)
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let manager = Arc::new(build_manager(&config, &shutdown).await?);
    let app = router(manager.clone()).layer(cors_layer(&config.allowed_origins));

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    log::info!("Server listening on http://{}", config.bind_address);

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await?;

    manager.cancel_sync();
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            log::info!("Received SIGTERM signal");
        },
    }

    log::info!("Shutdown signal received, exiting gracefully...");
    shutdown.cancel();
}
