//! Response envelopes, error mapping, and the public (unauthenticated)
//! handlers.
//!
//! Single resources respond as `{"data": <T>}`; lists as
//! `{"data": {"items": [...], "pagination": {...}}}`. Errors respond as
//! `{"errors": <message>, "code": <CODE>}` with an optional `details`
//! array of field issues.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use paraf_core::progress::{self, Pagination};
use paraf_core::{EngineError, FieldIssue};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::state::AppState;

/// An API error ready to serialize into the error envelope.
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Vec<FieldIssue>>,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::UnauthorizedActor { .. } => StatusCode::FORBIDDEN,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::AmbiguousRule { .. }
            | EngineError::InvalidState { .. }
            | EngineError::Conflict { .. } => StatusCode::CONFLICT,
            EngineError::NoMatchingRule { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = e.code();
        // 500 bodies stay generic; the detail goes to the log.
        let (message, details) = match e {
            EngineError::Storage(detail) => {
                tracing::error!(error = %detail, "storage failure");
                ("internal storage failure".to_string(), None)
            }
            EngineError::Validation(issues) => ("validation failed".to_string(), Some(issues)),
            other => (other.to_string(), None),
        };
        Self {
            status,
            code,
            message,
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "errors": self.message,
            "code": self.code,
        });
        if let Some(details) = self.details {
            body["details"] = json!(details);
        }
        (self.status, Json(body)).into_response()
    }
}

/// `{"data": <T>}` envelope.
pub(crate) fn data<T: Serialize>(value: T) -> Json<serde_json::Value> {
    Json(json!({ "data": value }))
}

/// `{"data": {"items": [...], "pagination": {...}}}` envelope.
pub(crate) fn paged<T: Serialize>(items: Vec<T>, pagination: Pagination) -> Json<serde_json::Value> {
    Json(json!({ "data": { "items": items, "pagination": pagination } }))
}

pub(crate) async fn handle_health() -> impl IntoResponse {
    data(json!({ "status": "ok" }))
}

/// Public progress tracker: one letter's timeline by id, no listing.
pub(crate) async fn handle_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let view = progress::project(&state.store, id).await?;
    Ok(data(view))
}

/// Public stored-letter download.
pub(crate) async fn handle_letter_file(
    State(state): State<Arc<AppState>>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    match state.files.open(&file_name).await? {
        Some(bytes) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/pdf")],
            bytes,
        )
            .into_response()),
        None => Err(ApiError::not_found(format!(
            "letter file not found: {}",
            file_name
        ))),
    }
}

pub(crate) async fn handle_not_found() -> ApiError {
    ApiError::not_found("no such route")
}
