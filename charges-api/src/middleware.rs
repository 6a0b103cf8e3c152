//! Request middleware: correlation ids and the external API-key guard.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;
use webhook_codec::REQUEST_ID_HEADER;

use crate::api::AppState;
use crate::error::ApiError;

/// Ensure every request carries an `X-Request-Id` and echo it back on the
/// response so callers can correlate across services.
pub async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id)
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
    request.headers_mut().insert(REQUEST_ID_HEADER, header_value.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    response
}

/// Bearer API-key guard for the external payment surface.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("API key missing".into()))?;

    let api_key = header.strip_prefix("Bearer ").unwrap_or(header).trim();

    match &state.config.external_api_key {
        Some(expected) if api_key == expected => Ok(next.run(request).await),
        _ => Err(ApiError::Forbidden("invalid API key".into())),
    }
}
