use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::{handlers, middleware::authenticate_bearer, AppState};

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/messages",
            get(handlers::handle_list_messages).post(handlers::handle_send_message),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate_bearer));

    Router::new()
        .route("/", get(handlers::health_check))
        .route("/auth/signup", post(handlers::handle_sign_up))
        .route("/auth/signin", post(handlers::handle_sign_in))
        .route("/auth/refresh", post(handlers::handle_refresh))
        .merge(protected)
        .with_state(state)
}
