use axum::{
    body::{Body, to_bytes},
    http::{Request, header},
    middleware::Next,
    response::Response,
};

// 错误响应体只是一个 ApiResult 信封，不会很大
const MAX_LOGGED_BODY: usize = 4096;

/// 记录所有 5xx 响应的请求路径和响应体
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = next.run(req).await;

    if !response.status().is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    match to_bytes(body, MAX_LOGGED_BODY).await {
        Ok(bytes) => {
            tracing::error!(
                "{} {} failed - Status: {}, Body: {}",
                method,
                uri,
                parts.status,
                String::from_utf8_lossy(&bytes)
            );
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            tracing::error!(
                "{} {} failed - Status: {}, body unreadable: {}",
                method,
                uri,
                parts.status,
                e
            );
            Response::from_parts(parts, Body::empty())
        }
    }
}
