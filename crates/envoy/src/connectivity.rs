use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

pub const PROBE_INTERVAL: Duration = Duration::from_secs(15);

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Publishes whether the backend is reachable on a watch channel.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    tx: watch::Sender<bool>,
    probe_interval: Duration,
}

impl ConnectivityMonitor {
    /// Starts out assuming we are offline until the first probe says otherwise.
    pub fn new(probe: Arc<dyn ReachabilityProbe>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            probe,
            tx,
            probe_interval: PROBE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, probe_interval: Duration) -> Self {
        self.probe_interval = probe_interval;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn publish(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                tracing::info!("Backend reachable");
            } else {
                tracing::warn!("Backend unreachable");
            }
        }
    }

    /// Probe immediately and publish the result.
    pub async fn check_now(&self) -> bool {
        let online = self.probe.is_reachable().await;
        self.publish(online);
        online
    }

    /// Record a connectivity failure seen by a regular request.
    pub fn report_offline(&self) {
        self.publish(false);
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_now().await;
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

/// Follows a connectivity channel and resolves on each transition from
/// offline back to online.
pub struct Reconnects {
    rx: watch::Receiver<bool>,
    was_online: bool,
}

impl Reconnects {
    pub fn new(mut rx: watch::Receiver<bool>) -> Self {
        let was_online = *rx.borrow_and_update();
        Self { rx, was_online }
    }

    /// `None` once the monitor is gone. Cancel safe.
    pub async fn next(&mut self) -> Option<()> {
        loop {
            self.rx.changed().await.ok()?;
            let online = *self.rx.borrow_and_update();
            let came_back = online && !self.was_online;
            self.was_online = online;
            if came_back {
                return Some(());
            }
        }
    }
}
