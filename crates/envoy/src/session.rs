// Session persistence and the background token-refresh monitor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock};
use tokio::time::{interval, MissedTickBehavior};

use lina_shared::{now_secs, Session};

use crate::error::ClientError;

pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Shared, optionally file-backed slot for the current session. Clones
/// share one refresh lock so only one token exchange runs at a time.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    inner: Arc<RwLock<Option<Session>>>,
    path: Option<PathBuf>,
    refresh_lock: Arc<Mutex<()>>,
}

impl SessionHandle {
    pub fn in_memory(session: Option<Session>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(session)),
            path: None,
            refresh_lock: Arc::default(),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let session = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Session>(&content) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable session file");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(session)),
            path: Some(path),
            refresh_lock: Arc::default(),
        })
    }

    /// Wait for any running refresh, then hold the lock.
    pub async fn begin_refresh(&self) -> OwnedMutexGuard<()> {
        self.refresh_lock.clone().lock_owned().await
    }

    /// `None` while another refresh is running.
    pub fn try_begin_refresh(&self) -> Option<OwnedMutexGuard<()>> {
        self.refresh_lock.clone().try_lock_owned().ok()
    }

    pub async fn get(&self) -> Option<Session> {
        self.inner.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner.read().await.as_ref().map(|s| s.access_token.clone())
    }

    pub async fn set(&self, session: Session) -> Result<(), ClientError> {
        let mut slot = self.inner.write().await;
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&session)?)?;
        }
        *slot = Some(session);
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        let mut slot = self.inner.write().await;
        if let Some(path) = &self.path {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        *slot = None;
        Ok(())
    }
}

/// Exchanges a session that is about to expire for a fresh one.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh(&self, session: &Session) -> Result<Session, ClientError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    NoSession,
    /// More than the threshold remains; nothing to do.
    Fresh,
    /// Another check is already refreshing.
    InFlight,
    Refreshed,
    /// Transient failure; the next tick tries again.
    Failed,
    /// The refresh token was rejected and the session was cleared.
    SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub seconds_remaining: i64,
    pub expiring_soon: bool,
}

pub struct TokenRefreshMonitor {
    handle: SessionHandle,
    refresher: Arc<dyn SessionRefresher>,
    check_interval: Duration,
}

impl TokenRefreshMonitor {
    pub fn new(handle: SessionHandle, refresher: Arc<dyn SessionRefresher>) -> Self {
        Self {
            handle,
            refresher,
            check_interval: CHECK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub async fn status(&self, now: i64) -> Option<SessionStatus> {
        self.handle.get().await.map(|s| SessionStatus {
            seconds_remaining: s.seconds_remaining(now),
            expiring_soon: s.is_expiring_soon(now),
        })
    }

    /// Refresh the session if it is expiring soon. Checks made while the
    /// session is still fresh, or while a refresh is running, do nothing.
    pub async fn check(&self, now: i64) -> RefreshOutcome {
        let Some(_guard) = self.handle.try_begin_refresh() else {
            return RefreshOutcome::InFlight;
        };

        let Some(session) = self.handle.get().await else {
            return RefreshOutcome::NoSession;
        };

        if !session.is_expiring_soon(now) {
            return RefreshOutcome::Fresh;
        }

        tracing::debug!(
            seconds_remaining = session.seconds_remaining(now),
            "Session expiring soon, refreshing"
        );

        match self.refresher.refresh(&session).await {
            Ok(fresh) => match self.handle.set(fresh).await {
                Ok(()) => {
                    tracing::info!("Session refreshed");
                    RefreshOutcome::Refreshed
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not store refreshed session");
                    RefreshOutcome::Failed
                }
            },
            Err(e) if matches!(e, ClientError::Unauthorized { .. }) || e.is_rejection() => {
                tracing::warn!(error = %e, "Refresh rejected, signing out");
                if let Err(e) = self.handle.clear().await {
                    tracing::warn!(error = %e, "Could not clear session");
                }
                RefreshOutcome::SignedOut
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session refresh failed, will retry");
                RefreshOutcome::Failed
            }
        }
    }

    /// Check on start and then every `check_interval` until shutdown.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check(now_secs()).await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn session(expires_at: i64) -> Session {
        Session {
            access_token: "access-1".into(),
            refresh_token: "refresh-1".into(),
            user_id: "u1".into(),
            email: "lina@example.com".into(),
            expires_at,
        }
    }

    enum Behaviour {
        Succeed,
        Reject,
        Offline,
    }

    struct FakeRefresher {
        calls: AtomicUsize,
        behaviour: Behaviour,
    }

    impl FakeRefresher {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behaviour,
            })
        }
    }

    #[async_trait]
    impl SessionRefresher for FakeRefresher {
        async fn refresh(&self, old: &Session) -> Result<Session, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => Ok(Session {
                    access_token: "access-2".into(),
                    refresh_token: "refresh-2".into(),
                    expires_at: old.expires_at + 3600,
                    ..old.clone()
                }),
                Behaviour::Reject => Err(ClientError::Unauthorized {
                    code: "INVALID_REFRESH_TOKEN".into(),
                    message: "used".into(),
                }),
                Behaviour::Offline => Err(ClientError::Network("offline".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_checks_before_threshold_are_noops() {
        let refresher = FakeRefresher::new(Behaviour::Succeed);
        let handle = SessionHandle::in_memory(Some(session(10_000)));
        let monitor = TokenRefreshMonitor::new(handle.clone(), refresher.clone());

        for now in [0, 5_000, 9_700] {
            assert_eq!(monitor.check(now).await, RefreshOutcome::Fresh);
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.get().await.unwrap().access_token, "access-1");
    }

    #[tokio::test]
    async fn test_refreshes_inside_threshold() {
        let refresher = FakeRefresher::new(Behaviour::Succeed);
        let handle = SessionHandle::in_memory(Some(session(10_000)));
        let monitor = TokenRefreshMonitor::new(handle.clone(), refresher.clone());

        assert_eq!(monitor.check(9_701).await, RefreshOutcome::Refreshed);
        assert_eq!(handle.access_token().await.as_deref(), Some("access-2"));

        // The new session is fresh, so a second check does nothing.
        assert_eq!(monitor.check(9_702).await, RefreshOutcome::Fresh);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_signs_out() {
        let handle = SessionHandle::in_memory(Some(session(100)));
        let monitor = TokenRefreshMonitor::new(handle.clone(), FakeRefresher::new(Behaviour::Reject));

        assert_eq!(monitor.check(200).await, RefreshOutcome::SignedOut);
        assert!(handle.get().await.is_none());
        assert_eq!(monitor.check(200).await, RefreshOutcome::NoSession);
    }

    #[tokio::test]
    async fn test_offline_refresh_keeps_session() {
        let handle = SessionHandle::in_memory(Some(session(100)));
        let monitor = TokenRefreshMonitor::new(handle.clone(), FakeRefresher::new(Behaviour::Offline));

        assert_eq!(monitor.check(50).await, RefreshOutcome::Failed);
        assert!(handle.get().await.is_some());
    }

    #[tokio::test]
    async fn test_check_defers_to_running_refresh() {
        let refresher = FakeRefresher::new(Behaviour::Succeed);
        let handle = SessionHandle::in_memory(Some(session(100)));
        let monitor = TokenRefreshMonitor::new(handle.clone(), refresher.clone());

        let guard = handle.try_begin_refresh().unwrap();
        assert_eq!(monitor.check(50).await, RefreshOutcome::InFlight);
        assert!(handle.try_begin_refresh().is_none());
        drop(guard);

        assert_eq!(monitor.check(50).await, RefreshOutcome::Refreshed);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_reports_remaining() {
        let handle = SessionHandle::in_memory(Some(session(1_000)));
        let monitor = TokenRefreshMonitor::new(handle, FakeRefresher::new(Behaviour::Succeed));

        let status = monitor.status(800).await.unwrap();
        assert_eq!(status.seconds_remaining, 200);
        assert!(status.expiring_soon);
        assert!(!monitor.status(0).await.unwrap().expiring_soon);
    }

    #[tokio::test]
    async fn test_session_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        let handle = SessionHandle::load(&path).unwrap();
        assert!(handle.get().await.is_none());
        handle.set(session(42)).await.unwrap();

        let reloaded = SessionHandle::load(&path).unwrap();
        assert_eq!(reloaded.get().await, Some(session(42)));

        reloaded.clear().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_checks_on_start_and_stops() {
        let refresher = FakeRefresher::new(Behaviour::Succeed);
        let handle = SessionHandle::in_memory(Some(session(now_secs() + 10)));
        let monitor = Arc::new(
            TokenRefreshMonitor::new(handle.clone(), refresher.clone())
                .with_interval(Duration::from_secs(60)),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.access_token().await.as_deref(), Some("access-2"));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
