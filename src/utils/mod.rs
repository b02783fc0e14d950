use axum::Json;
use serde::Serialize;

use crate::result::ApiResult;

pub mod geo;

pub use geo::distance;

// 成功响应统一包装成 Json<ApiResult<T>>，错误走 AppError
pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResult<T>> {
    Json(ApiResult::success(data))
}

/// 用户名会成为队列名和路由键的一部分，只允许字母、数字、下划线和连字符
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const STORE_UNAVAILABLE: i32 = 5003;
}
