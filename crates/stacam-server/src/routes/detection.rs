//! `/api/detection` endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stacam::{CameraId, DetectionRecord, DetectionService, DetectionStatus};

use crate::error::ApiError;
use crate::state::AppState;

const UPLOAD_ACCEPTED: &str = "File uploaded successfully and processing started";

pub fn route(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/results", get(recent))
        .route("/results/since", get(since))
        .route("/results/:id", get(find))
        .route("/health", get(health))
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub detection_id: i64,
    pub file_name: String,
    pub camera_id: CameraId,
    pub status: DetectionStatus,
}

impl From<DetectionRecord> for UploadResponse {
    fn from(record: DetectionRecord) -> Self {
        Self {
            success: true,
            message: UPLOAD_ACCEPTED.to_string(),
            detection_id: record.id_or_default(),
            file_name: record.file_name,
            camera_id: record.camera_id,
            status: record.status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SinceParams {
    pub minutes: i64,
}

/// Runs a blocking service call off the async runtime.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&DetectionService) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || f(service.as_ref())).await?
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut camera_id: Option<String> = None;
    let mut file_name: Option<String> = None;
    let mut content = Bytes::new();

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                content = field.bytes().await?;
            }
            Some("cameraId") => camera_id = Some(field.text().await?),
            _ => {}
        }
    }

    let record = blocking(&state, move |service| {
        service
            .accept_upload(camera_id.as_deref(), file_name.as_deref(), &content)
            .map_err(ApiError::from)
    })
    .await?;

    Ok(Json(record.into()))
}

async fn recent(State(state): State<AppState>) -> Result<Json<Vec<DetectionRecord>>, ApiError> {
    let records = blocking(&state, |service| Ok(service.recent()?)).await?;
    Ok(Json(records))
}

async fn since(
    State(state): State<AppState>,
    Query(params): Query<SinceParams>,
) -> Result<Json<Vec<DetectionRecord>>, ApiError> {
    let records = blocking(&state, move |service| {
        Ok(service.since_minutes(params.minutes)?)
    })
    .await?;
    Ok(Json(records))
}

async fn find(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DetectionRecord>, ApiError> {
    blocking(&state, move |service| service.find(id)?.ok_or(ApiError::NotFound))
        .await
        .map(Json)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
