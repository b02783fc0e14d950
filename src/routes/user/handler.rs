use axum::{
    Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    common::Location,
    error::AppError,
    presence::Endpoint,
    proximity::NearbyUser,
    result::ApiResult,
    utils::{is_valid_username, success_to_api_response},
};

use super::model::{HeartbeatRequest, NearbyQuery, RegisterRequest, UpdateLocationRequest};

fn check_location(location: &Location) -> Result<(), AppError> {
    if location.is_finite() {
        Ok(())
    } else {
        Err(AppError::Validation("经纬度必须是有效数字".into()))
    }
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<ApiResult<bool>>, AppError> {
    if !is_valid_username(&req.username) {
        return Err(AppError::Validation(
            "用户名格式无效，只允许使用字母、数字、下划线和连字符".into(),
        ));
    }
    check_location(&req.location)?;
    if req.endpoint.trim().is_empty() {
        return Err(AppError::Validation("缺少endpoint参数".into()));
    }

    state
        .registry
        .register(&req.username, req.location, Endpoint::new(req.endpoint));
    Ok(success_to_api_response(true))
}

#[axum::debug_handler]
pub async fn update_location(
    State(state): State<AppState>,
    Json(req): Json<UpdateLocationRequest>,
) -> Result<Json<ApiResult<bool>>, AppError> {
    check_location(&req.location)?;
    let updated = state.registry.update_location(&req.username, req.location);
    Ok(success_to_api_response(updated))
}

#[axum::debug_handler]
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<ApiResult<bool>> {
    success_to_api_response(state.registry.heartbeat(&req.username))
}

#[axum::debug_handler]
pub async fn nearby(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<ApiResult<Vec<NearbyUser>>>, AppError> {
    let radius = query.radius.unwrap_or(state.proximity.default_radius());
    if !radius.is_finite() || radius < 0.0 {
        return Err(AppError::Validation("radius必须是非负数".into()));
    }

    Ok(success_to_api_response(
        state.proximity.nearby(&query.username, radius),
    ))
}
