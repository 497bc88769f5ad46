// API key middleware

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Query, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

/// Key from `x-api-key`, `Authorization: Bearer`, or the `api_key` query parameter
///
/// The query form exists for EventSource clients, which cannot set headers.
fn presented_key(request: &Request) -> Option<String> {
    let headers = request.headers();
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }
    Query::<ApiKeyQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|q| q.0.api_key)
}

/// Reject requests without an allow-listed key; no-op when the list is empty
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.api_keys.is_empty() {
        return Ok(next.run(request).await);
    }

    match presented_key(&request) {
        Some(key) if state.api_keys.iter().any(|k| *k == key) => Ok(next.run(request).await),
        Some(_) => Err(ApiError::unauthorized("Invalid API key")),
        None => Err(ApiError::unauthorized("Missing API key")),
    }
}
