//! Error responses.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sculpin_query::{ErrorInfo, ErrorKind, QueryError};
use serde::Serialize;

/// Body of every failed request: `{"error": {"kind", "message"}}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

/// A failed request.
#[derive(Debug)]
pub struct ApiError(pub ErrorInfo);

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self(ErrorInfo {
            kind,
            message: message.into(),
        })
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.0.kind)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::DimensionMismatch
        | ErrorKind::InvalidVector
        | ErrorKind::InvalidRecord
        | ErrorKind::InvalidConfig
        | ErrorKind::InvalidQuery => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::DuplicateId
        | ErrorKind::AlreadyExists
        | ErrorKind::InsufficientData
        | ErrorKind::Cancelled => StatusCode::CONFLICT,
        ErrorKind::NotIndexed | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        Self(e.info())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::new(ErrorKind::InvalidQuery, e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0.message);
        }
        (status, Json(ErrorResponse { error: self.0 })).into_response()
    }
}
