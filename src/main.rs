use ledger_gateway::api::{create_router, AppState};
use ledger_gateway::config::Settings;
use ledger_gateway::idempotency::{EvictionSweeper, IdempotencyMediator, RecordStore, StoreConfig};
use ledger_gateway::observability::{init_logging, init_metrics, LogConfig};
use ledger_gateway::services::InMemoryLedger;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging
    init_logging(&LogConfig::from(&settings.application))?;
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;

    // Idempotency layer
    let store = Arc::new(RecordStore::new(StoreConfig::from_settings(&settings.idempotency)));
    let mediator = Arc::new(IdempotencyMediator::new(&settings.idempotency, Arc::clone(&store))?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = EvictionSweeper::new(
        Arc::clone(&store),
        mediator.metrics(),
        settings.idempotency.sweep_interval(),
    )
    .start(shutdown_rx);
    info!(
        ttl_seconds = settings.idempotency.ttl_seconds,
        max_records = settings.idempotency.max_records,
        protected_paths = ?settings.idempotency.protected_paths,
        "Idempotency layer ready"
    );

    let state = AppState::new(Arc::new(InMemoryLedger::new()), mediator).with_metrics(metrics_handle);
    let app = create_router(state);

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!("Eviction sweeper did not stop cleanly: {}", e);
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
