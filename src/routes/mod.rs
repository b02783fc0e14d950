use axum::{
    Json, Router,
    extract::State,
    routing::{get, post, put},
};
use serde::Serialize;

use crate::{
    AppState, middleware::log_errors, offline::ConnectionStatus, result::ApiResult,
    utils::success_to_api_response,
};

pub mod message;
pub mod user;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub broker: ConnectionStatus,
    pub users: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<ApiResult<HealthResponse>> {
    success_to_api_response(HealthResponse {
        broker: state.store.status(),
        users: state.registry.len(),
    })
}

/// 构建完整路由，所有接口挂在 `api_base_uri` 下
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/users/register", post(user::register))
        .route("/users/location", put(user::update_location))
        .route("/users/heartbeat", post(user::heartbeat))
        .route("/users/nearby", get(user::nearby))
        .route("/messages/send", post(message::send))
        .route("/messages/offline", post(message::offline))
        .route("/health", get(health));

    let base = state.config.api_base_uri.trim_end_matches('/');
    // axum 不允许在根路径 nest
    let router = if base.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(base, api)
    };

    router
        .layer(axum::middleware::from_fn(log_errors))
        .with_state(state)
}
