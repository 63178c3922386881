//! HTTP middleware: rate limiting, API key authentication, and per-request
//! actor resolution for the admin surface.

use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use paraf_storage::ParafStorage;
use uuid::Uuid;

use super::handlers::ApiError;
use super::state::AppState;

/// Rate limiting middleware. Checks per-IP request rate before routing.
pub(crate) async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();
    match state.rate_limiter.check(ip).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            let body = serde_json::json!({
                "errors": "rate limit exceeded",
                "code": "RATE_LIMITED",
                "retry_after": retry_after,
            });
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
    }
}

/// API key authentication middleware.
///
/// If `PARAF_API_KEY` is set, all requests (except /health) must include
/// either `Authorization: Bearer <key>` or `X-API-Key: <key>`.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let expected_key = match &state.api_key {
        Some(k) => k,
        None => return next.run(request).await, // No auth configured
    };

    // /health is exempt (for load balancer health checks)
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    if let Some(auth) = auth_header {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            if token == expected_key {
                return next.run(request).await;
            }
            return ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "invalid API key")
                .into_response();
        }
    }

    let api_key_header = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    if let Some(key) = api_key_header {
        if key == expected_key {
            return next.run(request).await;
        }
        return ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "invalid API key")
            .into_response();
    }

    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "UNAUTHENTICATED",
        "authentication required",
    )
    .into_response()
}

/// Actor resolution for `/admin`.
///
/// `X-Actor-Id` carries the acting user's UUID; the user record is looked
/// up in the directory and attached to the request for handlers to
/// extract. No process-wide auth state exists.
pub(crate) async fn actor_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let raw = match request
        .headers()
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
    {
        Some(raw) => raw,
        None => {
            return ApiError::new(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED_ACTOR",
                "missing X-Actor-Id header",
            )
            .into_response()
        }
    };

    let actor_id = match Uuid::parse_str(raw) {
        Ok(id) => id,
        Err(_) => {
            return ApiError::bad_request("X-Actor-Id must be a UUID").into_response();
        }
    };

    match state.store.get_user(actor_id).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(_) => ApiError::new(
            StatusCode::FORBIDDEN,
            "UNAUTHORIZED_ACTOR",
            format!("no such actor: {}", actor_id),
        )
        .into_response(),
    }
}
