use anyhow::Result;
use tokio::sync::watch;

use super::{routes::create_router, AppState};

pub async fn start_server(state: AppState, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let bind = state.config.bind.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("HeyLina API listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_rx))
        .await?;

    Ok(())
}

async fn shutdown_signal(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }
    tracing::info!("Shutting down API server...");
}
