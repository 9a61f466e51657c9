use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Paths reachable without an API key.
const PUBLIC_PATHS: &[&str] = &["/", "/health", "/api/health"];

/// Stamp a fresh request id on the request and its response.
pub async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let Ok(value) = HeaderValue::from_str(&request_id) else {
        return next.run(request).await;
    };
    request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, value);
    response
}

/// Require `X-API-Key: <key>` or `Authorization: Bearer <key>` when a key is
/// configured.
pub async fn require_api_key(State(api_key): State<Option<Arc<str>>>, request: Request, next: Next) -> Response {
    let Some(expected) = api_key else {
        return next.run(request).await;
    };
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let headers = request.headers();
    let from_header = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    let from_bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = [from_header, from_bearer]
        .into_iter()
        .flatten()
        .any(|key| key == &*expected);
    if !authorized {
        tracing::warn!(path = %request.uri().path(), "rejected request without valid API key");
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}
