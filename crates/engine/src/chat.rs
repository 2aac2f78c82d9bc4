use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

use lina_shared::messages::{SendMessageRequest, SendMessageResponse};
use lina_shared::ChatMessage;

use crate::api::types::ApiError;
use crate::api::AppState;
use crate::provider::PromptMessage;

pub const MAX_CONTENT_CHARS: usize = 4000;

pub fn validate_content(content: &str) -> Result<&str, ApiError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("EMPTY_MESSAGE", "Message cannot be empty"));
    }
    if trimmed.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::bad_request(
            "MESSAGE_TOO_LONG",
            format!("Message must be at most {} characters", MAX_CONTENT_CHARS),
        ));
    }
    Ok(trimmed)
}

/// One async lock per `(user, idempotency key)` so duplicate sends of the
/// same message run one after another instead of racing to the provider.
#[derive(Debug, Default)]
pub struct TurnLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnLocks {
    pub async fn lock(&self, user_id: &str, key: &str) -> TurnGuard<'_> {
        let slot = format!("{}:{}", user_id, key);
        let mutex = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(slot.clone())
            .or_default()
            .clone();

        TurnGuard {
            locks: self,
            slot,
            guard: Some(mutex.lock_owned().await),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct TurnGuard<'a> {
    locks: &'a TurnLocks,
    slot: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.locks.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own handle left: nobody holds or waits on this key.
        if slots.get(&self.slot).is_some_and(|m| Arc::strong_count(m) == 1) {
            slots.remove(&self.slot);
        }
    }
}

/// Build the prompt: system prompt followed by recent history, oldest first.
pub fn build_prompt(system_prompt: &str, history: &[ChatMessage]) -> Vec<PromptMessage> {
    let mut prompt = Vec::with_capacity(history.len() + 1);
    prompt.push(PromptMessage::new("system", system_prompt));
    prompt.extend(
        history
            .iter()
            .map(|m| PromptMessage::new(m.role.as_str(), m.content.clone())),
    );
    prompt
}

/// Persist the user's message, ask the completion provider for a reply and
/// persist that too. Re-sending with the same idempotency key returns the
/// stored pair without calling the provider again, including when the
/// duplicate arrives while the first request is still waiting on it.
pub async fn send_message(
    state: &AppState,
    user_id: &str,
    req: SendMessageRequest,
) -> Result<SendMessageResponse, ApiError> {
    let content = validate_content(&req.content)?;
    let key = req
        .idempotency_key
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let _turn = state.turns.lock(user_id, &key).await;
    let user_message = state.db.upsert_user_message(user_id, content, &key)?;

    if let Some(existing) = state.db.find_reply(&user_message.id)? {
        tracing::debug!(user_id, idempotency_key = %key, "Replaying stored reply");
        return Ok(SendMessageResponse {
            user_message,
            assistant_message: existing,
        });
    }

    let history = state
        .db
        .list_messages(user_id, state.config.history_limit, 0)?;
    let prompt = build_prompt(&state.config.system_prompt, &history);

    let reply = match state.provider.complete(&prompt).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Completion failed");
            return Err(ApiError::bad_gateway("Lina couldn't reply right now"));
        }
    };

    let assistant_message = state
        .db
        .insert_assistant_message(user_id, &reply, &user_message.id)?;

    tracing::info!(user_id, message_id = %user_message.id, "Chat turn completed");

    Ok(SendMessageResponse {
        user_message,
        assistant_message,
    })
}
