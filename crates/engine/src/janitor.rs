use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use lina_shared::now_secs;

use crate::db::Db;

/// Sessions stay around this long after expiry before they are purged.
const GRACE_SECS: i64 = 24 * 60 * 60;

/// Periodically removes long-expired sessions.
pub struct Janitor {
    db: Arc<Db>,
    poll_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl Janitor {
    pub fn new(db: Arc<Db>, poll_interval: Duration, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            db,
            poll_interval,
            shutdown_rx,
        }
    }

    pub fn sweep(&self, now: i64) -> Result<usize> {
        let removed = self.db.purge_sessions(now - GRACE_SECS)?;
        if removed > 0 {
            tracing::info!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }

    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(now_secs()) {
                        tracing::warn!(error = %e, "Session sweep failed");
                    }
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        tracing::info!("Janitor shutting down gracefully...");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SessionRow, UserRow};

    fn seeded_db() -> Arc<Db> {
        let db = Db::open_in_memory().unwrap();
        db.create_user(&UserRow {
            id: "u1".into(),
            email: "a@b.co".into(),
            password_hash: "h".into(),
            salt: "s".into(),
        })
        .unwrap();
        for (token, expires_at) in [("stale", 0), ("recent", 1_000_000)] {
            db.insert_session(&SessionRow {
                access_token: token.into(),
                refresh_token: format!("{}-r", token),
                user_id: "u1".into(),
                expires_at,
            })
            .unwrap();
        }
        Arc::new(db)
    }

    #[test]
    fn test_sweep_keeps_sessions_within_grace() {
        let db = seeded_db();
        let (_tx, rx) = watch::channel(false);
        let janitor = Janitor::new(db.clone(), Duration::from_secs(60), rx);

        assert_eq!(janitor.sweep(1_000_000 + 10).unwrap(), 1);
        assert!(db.find_session("recent").unwrap().is_some());
        assert!(db.find_session("stale").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let janitor = Janitor::new(seeded_db(), Duration::from_millis(10), rx);
        let handle = tokio::spawn(janitor.run());

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
