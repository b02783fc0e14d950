use axum::{Json, extract::State};

use crate::{
    AppState,
    delivery::SendOutcome,
    error::AppError,
    offline::PendingMessage,
    result::ApiResult,
    utils::success_to_api_response,
};

use super::model::{OfflineMessagesRequest, SendMessageRequest};

// 投递结果在 content 中返回，队列不可用时 status 为 FAILED
#[axum::debug_handler]
pub async fn send(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Json<ApiResult<SendOutcome>> {
    let outcome = state
        .delivery
        .send(&req.sender, &req.recipient, &req.message)
        .await;
    success_to_api_response(outcome)
}

#[axum::debug_handler]
pub async fn offline(
    State(state): State<AppState>,
    Json(req): Json<OfflineMessagesRequest>,
) -> Result<Json<ApiResult<Vec<PendingMessage>>>, AppError> {
    let messages = state.store.fetch_all(&req.username).await?;
    if !messages.is_empty() {
        tracing::info!(
            "Delivered {} offline messages to {}",
            messages.len(),
            req.username
        );
    }
    Ok(success_to_api_response(messages))
}
