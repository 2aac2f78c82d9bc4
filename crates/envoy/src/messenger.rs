use std::sync::{Arc, Mutex, PoisonError};

use lina_shared::messages::SendMessageResponse;
use lina_shared::ChatMessage;

use crate::client::ApiClient;
use crate::connectivity::ConnectivityMonitor;
use crate::error::ClientError;
use crate::offline_queue::{OfflineQueue, QueueProgress, QueueReport, QueuedMessage};
use crate::retry::{retry, RetryConfig};
use crate::thread::MessageThread;

#[derive(Debug)]
pub enum SendOutcome {
    Delivered { reply: ChatMessage },
    /// Could not reach the backend; the message waits in the offline queue.
    Queued { local_id: String, queued: usize },
    Failed(ClientError),
}

#[derive(Debug, Default)]
pub struct FlushReport {
    pub queue: QueueReport,
    /// Lina's replies to the messages that went out, oldest first.
    pub replies: Vec<ChatMessage>,
}

/// Sends chat messages with optimistic updates, retry and offline fallback.
pub struct Messenger {
    client: ApiClient,
    queue: Arc<OfflineQueue>,
    retry: RetryConfig,
    connectivity: Option<Arc<ConnectivityMonitor>>,
    thread: MessageThread,
    drained: Vec<ChatMessage>,
}

impl Messenger {
    pub fn new(client: ApiClient, queue: Arc<OfflineQueue>, retry: RetryConfig) -> Self {
        Self {
            client,
            queue,
            retry,
            connectivity: None,
            thread: MessageThread::new(),
            drained: Vec::new(),
        }
    }

    pub fn with_connectivity(mut self, connectivity: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn thread(&self) -> &MessageThread {
        &self.thread
    }

    /// Pull the newest page of history into the thread.
    pub async fn load_history(&mut self, limit: u32) -> Result<usize, ClientError> {
        let client = self.client.clone();
        let page = retry(&self.retry, |_| client.list_messages(limit, 0)).await?;
        let count = page.messages.len();
        self.thread.merge(page.messages);
        Ok(count)
    }

    /// Replies to queued messages that `send` flushed ahead of a new one.
    pub fn take_drained(&mut self) -> Vec<ChatMessage> {
        std::mem::take(&mut self.drained)
    }

    fn known_offline(&self) -> bool {
        self.connectivity.as_ref().is_some_and(|c| !c.is_online())
    }

    fn queue_for_later(&mut self, local_id: &str, content: &str) -> SendOutcome {
        self.thread.mark_pending(local_id);
        match self.queue.push(QueuedMessage::with_local_id(local_id, content)) {
            Ok(_) => SendOutcome::Queued {
                local_id: local_id.to_string(),
                queued: self.queue.len(),
            },
            Err(e) => {
                self.thread.mark_failed(local_id);
                SendOutcome::Failed(e)
            }
        }
    }

    pub async fn send(&mut self, content: &str) -> SendOutcome {
        let content = content.trim();
        if content.is_empty() {
            return SendOutcome::Failed(ClientError::Validation("Message cannot be empty".into()));
        }

        let Some(session) = self.client.session().get().await else {
            return SendOutcome::Failed(ClientError::NotSignedIn);
        };

        let optimistic = self.thread.push_optimistic(&session.user_id, content);
        let local_id = optimistic.id.clone();

        if self.known_offline() {
            return self.queue_for_later(&local_id, content);
        }

        // Older messages go first; if they cannot, this one waits behind them.
        if !self.queue.is_empty() {
            match self.flush_queue(|_| {}).await {
                Ok(flush) => self.drained.extend(flush.replies),
                Err(e) => tracing::warn!(error = %e, "Could not drain queue before sending"),
            }
            if !self.queue.is_empty() {
                return self.queue_for_later(&local_id, content);
            }
        }

        let client = self.client.clone();
        let result = retry(&self.retry, |_| client.send_message(content, &local_id)).await;

        match result {
            Ok(response) => SendOutcome::Delivered {
                reply: self.apply_response(&local_id, response),
            },
            Err(e) if e.is_connectivity() => {
                if let Some(connectivity) = &self.connectivity {
                    connectivity.report_offline();
                }
                tracing::info!(local_id = %local_id, error = %e, "Send failed offline, queueing");
                self.queue_for_later(&local_id, content)
            }
            Err(e) => {
                self.thread.mark_failed(&local_id);
                SendOutcome::Failed(e)
            }
        }
    }

    fn apply_response(&mut self, local_id: &str, response: SendMessageResponse) -> ChatMessage {
        self.thread.reconcile(local_id, response.user_message);
        self.thread.merge(vec![response.assistant_message.clone()]);
        response.assistant_message
    }

    /// Drain the offline queue now with the same retry policy as `send`,
    /// reconciling each delivered message into the thread.
    pub async fn flush_queue(
        &mut self,
        progress: impl FnMut(QueueProgress),
    ) -> Result<FlushReport, ClientError> {
        let client = self.client.clone();
        let retry_config = self.retry.clone();
        let delivered = Mutex::new(Vec::new());
        let sink = &delivered;

        let queue = self
            .queue
            .process(
                move |m: QueuedMessage| {
                    let client = client.clone();
                    let retry_config = retry_config.clone();
                    async move {
                        let response =
                            retry(&retry_config, |_| client.send_message(&m.content, &m.local_id)).await?;
                        sink.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((m.local_id, response));
                        Ok(())
                    }
                },
                progress,
            )
            .await?;

        let delivered = delivered.into_inner().unwrap_or_else(PoisonError::into_inner);
        let replies = delivered
            .into_iter()
            .map(|(local_id, response)| self.apply_response(&local_id, response))
            .collect();

        Ok(FlushReport { queue, replies })
    }
}
