pub mod auth;
pub mod envelope;
pub mod messages;
pub mod session;

pub use envelope::{ApiEnvelope, ErrorBody};
pub use messages::{ChatMessage, MessageStatus, Role};
pub use session::Session;

/// Current unix time in whole seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
