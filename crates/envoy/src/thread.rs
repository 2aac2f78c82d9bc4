use chrono::Utc;

use lina_shared::{ChatMessage, MessageStatus, Role};

/// The client's view of the conversation, kept in display order.
#[derive(Debug, Default, Clone)]
pub struct MessageThread {
    messages: Vec<ChatMessage>,
}

impl MessageThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a pending user message before the server has seen it.
    pub fn push_optimistic(&mut self, user_id: &str, content: &str) -> ChatMessage {
        let local_id = uuid::Uuid::new_v4().to_string();
        let message = ChatMessage {
            id: local_id.clone(),
            local_id: Some(local_id),
            user_id: user_id.to_string(),
            role: Role::User,
            content: content.to_string(),
            created_at: Utc::now(),
            status: MessageStatus::Pending,
        };
        self.messages.push(message.clone());
        message
    }

    fn position_of_local(&self, local_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.local_id.as_deref() == Some(local_id) || m.id == local_id)
    }

    /// Replace the optimistic entry with the server's copy.
    pub fn reconcile(&mut self, local_id: &str, mut server: ChatMessage) {
        server.status = MessageStatus::Sent;
        if server.local_id.is_none() {
            server.local_id = Some(local_id.to_string());
        }

        match self.position_of_local(local_id) {
            Some(idx) => self.messages[idx] = server,
            None => self.merge(vec![server]),
        }
    }

    pub fn mark_failed(&mut self, local_id: &str) {
        if let Some(idx) = self.position_of_local(local_id) {
            self.messages[idx].status = MessageStatus::Failed;
        }
    }

    /// Set an entry back to pending, e.g. when it has been queued for resend.
    pub fn mark_pending(&mut self, local_id: &str) {
        if let Some(idx) = self.position_of_local(local_id) {
            self.messages[idx].status = MessageStatus::Pending;
        }
    }

    /// Upsert `incoming` by id or local id and restore display order.
    /// Merging the same payload again leaves the thread unchanged.
    pub fn merge(&mut self, incoming: Vec<ChatMessage>) {
        for message in incoming {
            match self.messages.iter().position(|m| m.same_as(&message)) {
                Some(idx) => {
                    let existing = &mut self.messages[idx];
                    let local_id = existing.local_id.clone();
                    *existing = message;
                    if existing.local_id.is_none() {
                        existing.local_id = local_id;
                    }
                }
                None => self.messages.push(message),
            }
        }

        // Stable sort keeps insertion order for equal timestamps.
        self.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }
}
