use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::Duration;

use lina_engine::api::{self, AppState};
use lina_engine::config::EngineConfig;
use lina_engine::db::Db;
use lina_engine::janitor::Janitor;
use lina_engine::logging;
use lina_engine::provider::OpenAiCompatProvider;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging("info");

    let config = EngineConfig::from_env()?;
    tracing::info!(
        db = %config.db_path.display(),
        model = %config.model,
        completion_url = %config.completion_url,
        "Starting HeyLina engine"
    );

    let db = Db::open(&config.db_path)?;
    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let state = AppState::new(db, provider, config);

    // Shared between API server and janitor
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let janitor = Janitor::new(state.db.clone(), Duration::from_secs(3600), shutdown_rx.clone());
    let janitor_handle = tokio::spawn(async move {
        if let Err(e) = janitor.run().await {
            tracing::error!(error = %e, "Janitor crashed");
        }
    });

    let api_shutdown_rx = shutdown_rx.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::start_server(state, api_shutdown_rx).await {
            tracing::error!(error = %e, "API server crashed");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal...");

    let _ = shutdown_tx.send(true);
    let _ = api_handle.await;
    let _ = janitor_handle.await;

    tracing::info!("HeyLina engine shutdown complete.");
    Ok(())
}
