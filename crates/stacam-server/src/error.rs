use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use stacam::db::DatabaseError;
use stacam::{StacamError, UploadError};

#[derive(Debug)]
pub enum ApiError {
    /// The upload request itself is invalid.
    BadRequest(String),
    /// The upload was valid but could not be stored or queued.
    UploadFailed(String),
    NotFound,
    /// The request body could not be read, e.g. it exceeds the upload limit.
    Rejected(StatusCode, String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::UploadFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to upload file: {msg}"),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Detection not found".to_string()),
            ApiError::Rejected(status, msg) => (status, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<StacamError> for ApiError {
    fn from(err: StacamError) -> Self {
        match err {
            StacamError::Upload(e) => e.into(),
            other => ApiError::UploadFailed(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Rejected(err.status(), err.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("task failed: {err}"))
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        ApiError::Internal(format!("database error: {err}"))
    }
}
