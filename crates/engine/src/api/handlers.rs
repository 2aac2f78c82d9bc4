use axum::{
    extract::{Query, State},
    Extension, Json,
};

use lina_shared::auth::{Credentials, RefreshRequest};
use lina_shared::messages::{MessagePage, SendMessageRequest, SendMessageResponse};
use lina_shared::{now_secs, ApiEnvelope, Session};

use super::types::*;
use super::AppState;
use crate::{auth, chat};

pub async fn handle_sign_up(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> ApiResult<Session> {
    let session = auth::sign_up(&state.db, &req, state.config.session_ttl_secs, now_secs())?;
    Ok(Json(ApiEnvelope::ok(session)))
}

pub async fn handle_sign_in(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> ApiResult<Session> {
    let session = auth::sign_in(&state.db, &req, state.config.session_ttl_secs, now_secs())?;
    Ok(Json(ApiEnvelope::ok(session)))
}

pub async fn handle_refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Session> {
    let session = auth::refresh(
        &state.db,
        &req.refresh_token,
        state.config.session_ttl_secs,
        now_secs(),
    )?;
    Ok(Json(ApiEnvelope::ok(session)))
}

pub async fn handle_list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<MessagePage> {
    let limit = query.limit();
    let offset = query.offset();
    let messages = state.db.list_messages(&user.user_id, limit, offset)?;

    Ok(Json(ApiEnvelope::ok(MessagePage {
        messages,
        limit,
        offset,
    })))
}

pub async fn handle_send_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<SendMessageResponse> {
    let response = chat::send_message(&state, &user.user_id, req).await?;
    Ok(Json(ApiEnvelope::ok(response)))
}

pub async fn health_check() -> &'static str {
    "HeyLina is running"
}
