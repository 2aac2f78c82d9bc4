// Offline queue: messages that could not be sent, persisted to disk and
// drained in order once the backend is reachable again.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    /// Also sent as the idempotency key.
    #[serde(default = "new_local_id")]
    pub local_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

fn new_local_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl QueuedMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self::with_local_id(new_local_id(), content)
    }

    pub fn with_local_id(local_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueProgress {
    pub sent: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub sent: usize,
    pub dropped: usize,
    pub total: usize,
    pub remaining: usize,
    /// Another drain was already running.
    pub skipped: bool,
}

pub struct OfflineQueue {
    path: PathBuf,
    items: Mutex<Vec<QueuedMessage>>,
    processing: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    /// Load the queue stored at `path`, or start empty if there is none.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let items = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Vec::new()
        };

        tracing::debug!(path = %path.display(), queued = items.len(), "Opened offline queue");

        Ok(Self {
            path,
            items: Mutex::new(items),
            processing: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedMessage>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, items: &[QueuedMessage]) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(items)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn enqueue(&self, content: impl Into<String>) -> Result<QueuedMessage, ClientError> {
        self.push(QueuedMessage::new(content))
    }

    /// Append an already-built item, e.g. one that keeps an optimistic local id.
    pub fn push(&self, message: QueuedMessage) -> Result<QueuedMessage, ClientError> {
        let mut items = self.lock();
        if items.iter().any(|m| m.local_id == message.local_id) {
            return Ok(message);
        }
        items.push(message.clone());
        self.persist(&items)?;

        tracing::info!(local_id = %message.local_id, queued = items.len(), "Message queued for later");
        Ok(message)
    }

    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) -> Result<(), ClientError> {
        let mut items = self.lock();
        items.clear();
        self.persist(&items)
    }

    fn front(&self) -> Option<QueuedMessage> {
        self.lock().first().cloned()
    }

    fn remove(&self, local_id: &str) -> Result<(), ClientError> {
        let mut items = self.lock();
        items.retain(|m| m.local_id != local_id);
        self.persist(&items)
    }

    fn bump_retry(&self, local_id: &str) -> Result<(), ClientError> {
        let mut items = self.lock();
        if let Some(item) = items.iter_mut().find(|m| m.local_id == local_id) {
            item.retry_count += 1;
        }
        self.persist(&items)
    }

    /// Send queued items in FIFO order through `send`.
    ///
    /// Stops at the first failure, leaving that item and everything after it
    /// queued. Items the server rejects outright (4xx, validation) are dropped,
    /// since resending them can never succeed. Only one drain runs at a time; a
    /// concurrent call returns a report with `skipped` set.
    pub async fn process<T, F, Fut, P>(&self, mut send: F, mut progress: P) -> Result<QueueReport, ClientError>
    where
        F: FnMut(QueuedMessage) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
        P: FnMut(QueueProgress),
    {
        let Ok(_guard) = self.processing.try_lock() else {
            return Ok(QueueReport {
                skipped: true,
                remaining: self.len(),
                ..QueueReport::default()
            });
        };

        let total = self.len();
        let mut report = QueueReport {
            total,
            ..QueueReport::default()
        };

        // Items queued while draining wait for the next run.
        for _ in 0..total {
            let Some(head) = self.front() else {
                break;
            };

            match send(head.clone()).await {
                Ok(_) => {
                    self.remove(&head.local_id)?;
                    report.sent += 1;
                    progress(QueueProgress {
                        sent: report.sent,
                        total,
                    });
                }
                Err(e) if e.is_rejection() => {
                    self.remove(&head.local_id)?;
                    report.dropped += 1;
                    tracing::warn!(local_id = %head.local_id, error = %e, "Dropped queued message");
                }
                Err(e) => {
                    self.bump_retry(&head.local_id)?;
                    tracing::warn!(local_id = %head.local_id, error = %e, "Queue drain paused");
                    break;
                }
            }
        }

        report.remaining = self.len();
        tracing::info!(
            sent = report.sent,
            dropped = report.dropped,
            remaining = report.remaining,
            "Queue drain finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn queue_in(dir: &TempDir) -> OfflineQueue {
        OfflineQueue::open(dir.path().join("queue.json")).unwrap()
    }

    #[test]
    fn test_fifo_order_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let queue = queue_in(&dir);
            for text in ["first", "second", "third"] {
                queue.enqueue(text).unwrap();
            }
        }

        let reopened = queue_in(&dir);
        let contents: Vec<_> = reopened.snapshot().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_legacy_items_without_local_id_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(
            &path,
            r#"[{"content":"hi","timestamp":"2026-03-01T10:00:00Z","retryCount":2}]"#,
        )
        .unwrap();

        let queue = OfflineQueue::open(&path).unwrap();
        let items = queue.snapshot();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].retry_count, 2);
        assert!(!items[0].local_id.is_empty());
    }

    #[test]
    fn test_push_ignores_duplicate_local_id() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        queue.push(QueuedMessage::with_local_id("l1", "hello")).unwrap();
        queue.push(QueuedMessage::with_local_id("l1", "hello")).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_process_sends_in_order_and_reports_progress() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        for text in ["a", "b", "c"] {
            queue.enqueue(text).unwrap();
        }

        let mut sent = Vec::new();
        let mut updates = Vec::new();
        let report = queue
            .process(
                |m| {
                    sent.push(m.content.clone());
                    async { Ok::<_, ClientError>(()) }
                },
                |p| updates.push(p),
            )
            .await
            .unwrap();

        assert_eq!(sent, vec!["a", "b", "c"]);
        assert_eq!(report.sent, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(updates.last(), Some(&QueueProgress { sent: 3, total: 3 }));
        assert!(queue_in(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_rest_queued() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        for text in ["a", "b", "c"] {
            queue.enqueue(text).unwrap();
        }

        let report = queue
            .process(
                |m| async move {
                    if m.content == "b" {
                        Err(ClientError::Network("offline".into()))
                    } else {
                        Ok(())
                    }
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.remaining, 2);

        let left = queue_in(&dir).snapshot();
        assert_eq!(left[0].content, "b");
        assert_eq!(left[0].retry_count, 1);
        assert_eq!(left[1].content, "c");
        assert_eq!(left[1].retry_count, 0);
    }

    #[tokio::test]
    async fn test_fatal_failure_drops_item_and_continues() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        queue.enqueue("bad").unwrap();
        queue.enqueue("good").unwrap();

        let report = queue
            .process(
                |m| async move {
                    if m.content == "bad" {
                        Err(ClientError::Client {
                            status: 400,
                            code: "MESSAGE_TOO_LONG".into(),
                            message: "too long".into(),
                        })
                    } else {
                        Ok(())
                    }
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(report.dropped, 1);
        assert_eq!(report.sent, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_pauses_instead_of_dropping() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir);
        queue.enqueue("keep me").unwrap();

        let report = queue
            .process(
                |_| async {
                    Err::<(), _>(ClientError::Unauthorized {
                        code: "SESSION_EXPIRED".into(),
                        message: "expired".into(),
                    })
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(report.dropped, 0);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_skipped() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(queue_in(&dir));
        queue.enqueue("only").unwrap();

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let first = {
            let queue = queue.clone();
            let release_rx = release_rx.clone();
            tokio::spawn(async move {
                queue
                    .process(
                        move |_| {
                            let release_rx = release_rx.clone();
                            async move {
                                let rx = release_rx.lock().await.take();
                                if let Some(rx) = rx {
                                    let _ = rx.await;
                                }
                                Ok::<_, ClientError>(())
                            }
                        },
                        |_| {},
                    )
                    .await
            })
        };

        // Let the first drain start and park on the release channel.
        while release_rx.try_lock().map(|g| g.is_some()).unwrap_or(true) {
            tokio::task::yield_now().await;
        }

        let second = queue
            .process(|_| async { Ok::<_, ClientError>(()) }, |_| {})
            .await
            .unwrap();
        assert!(second.skipped);

        release_tx.send(()).unwrap();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.sent, 1);
        assert!(!first.skipped);
    }
}
