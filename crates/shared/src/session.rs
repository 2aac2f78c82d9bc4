use serde::{Deserialize, Serialize};

/// Refresh when fewer than this many seconds remain.
pub const EXPIRY_THRESHOLD_SECS: i64 = 300;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub email: String,
    /// Unix timestamp (seconds).
    pub expires_at: i64,
}

impl Session {
    /// Seconds until expiry, clamped at zero.
    pub fn seconds_remaining(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }

    pub fn is_expiring_soon(&self, now: i64) -> bool {
        self.seconds_remaining(now) < EXPIRY_THRESHOLD_SECS
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}
