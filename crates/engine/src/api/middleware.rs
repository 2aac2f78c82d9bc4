use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::header::AUTHORIZATION;

use lina_shared::now_secs;

use super::types::AuthUser;
use super::AppState;
use crate::auth;

/// Resolve the bearer token to a user and stash it in request extensions.
pub async fn authenticate_bearer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let user_id = match auth::resolve_bearer(&state.db, header, now_secs()) {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!(code = e.code, "Rejected request");
            return e.into_response();
        }
    };

    req.extensions_mut().insert(AuthUser { user_id });
    next.run(req).await
}
