pub mod routes;
pub mod handlers;
pub mod server;
pub mod types;
mod middleware;

use std::sync::Arc;

use crate::chat::TurnLocks;
use crate::config::EngineConfig;
use crate::db::Db;
use crate::provider::CompletionProvider;

pub use routes::create_router;
pub use server::start_server;

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub provider: Arc<dyn CompletionProvider>,
    pub config: Arc<EngineConfig>,
    pub turns: Arc<TurnLocks>,
}

impl AppState {
    pub fn new(db: Db, provider: Arc<dyn CompletionProvider>, config: EngineConfig) -> Self {
        Self {
            db: Arc::new(db),
            provider,
            config: Arc::new(config),
            turns: Arc::new(TurnLocks::default()),
        }
    }
}
