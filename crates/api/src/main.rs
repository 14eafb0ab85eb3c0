use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use atomera_db::FsJobStore;
use atomera_engine::{EngineConfig, JobOrchestrator};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atomera_api::background::retention;
use atomera_api::config::ServerConfig;
use atomera_api::router::build_app_router;
use atomera_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "atomera_api=debug,atomera_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let engine_config = EngineConfig::from_env().expect("Invalid engine configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        storage_dir = %engine_config.storage_dir.display(),
        backend = %engine_config.effective_backend(),
        "Loaded configuration"
    );

    // --- Job store ---
    let store = FsJobStore::open(&engine_config.storage_dir)
        .await
        .expect("Failed to open job store");
    tracing::info!("Job store opened");

    // --- Job orchestrator ---
    let orchestrator = JobOrchestrator::from_config(&engine_config, Arc::new(store))
        .expect("Failed to build job orchestrator");
    orchestrator
        .recover_interrupted()
        .await
        .expect("Failed to recover jobs from a previous run");

    // --- Retention ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(retention::run(
        orchestrator.clone(),
        config.job_retention_hours,
        retention::CLEANUP_INTERVAL,
        retention_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        orchestrator: orchestrator.clone(),
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;

    orchestrator.shutdown().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
