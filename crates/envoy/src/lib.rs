pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod messenger;
pub mod offline_queue;
pub mod retry;
pub mod session;
pub mod thread;

pub use client::ApiClient;
pub use error::ClientError;
