use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::offline::StoreError;
use crate::result::ApiResult;
use crate::utils::error_codes;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match &self {
            AppError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                message.clone(),
            ),
            AppError::Store(StoreError::Exhausted { .. }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                error_codes::STORE_UNAVAILABLE,
                "离线消息服务暂不可用".to_string(),
            ),
            AppError::Store(StoreError::Serialization(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "内部服务器错误".to_string(),
            ),
        };

        tracing::debug!("Request failed: {}", self);
        (status, Json(ApiResult::<()>::error(code, &error_message))).into_response()
    }
}
