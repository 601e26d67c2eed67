use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::coordinator::{UploadCoordinator, UploadStatus};
use crate::error::UploadError;
use crate::models::{ChunkRequest, ErrorResponse, UploadStatusResponse};
use crate::state::AppState;

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

// probe: does the server already have this chunk?
pub async fn probe_chunk(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, HandlerError> {
    tracing::trace!("Probe request with {} params", params.len());
    run_upload(&state, None, ChunkRequest::probe(params)).await
}

// probe inside an instance namespace
pub async fn probe_instance_chunk(
    State(state): State<Arc<AppState>>,
    Path(instance): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, HandlerError> {
    tracing::trace!("Probe request for instance {}", instance);
    run_upload(&state, Some(&instance), ChunkRequest::probe(params)).await
}

// upload a chunk via multipart form data (a form without a file is a probe)
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, HandlerError> {
    let request = read_chunk_form(multipart).await?;
    run_upload(&state, None, request).await
}

// upload a chunk into an instance namespace
pub async fn upload_instance_chunk(
    State(state): State<Arc<AppState>>,
    Path(instance): Path<String>,
    multipart: Multipart,
) -> Result<Response, HandlerError> {
    let request = read_chunk_form(multipart).await?;
    run_upload(&state, Some(&instance), request).await
}

// health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "juicebox-resumable",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// text fields become protocol params, the file field is the chunk
async fn read_chunk_form(mut multipart: Multipart) -> Result<ChunkRequest, HandlerError> {
    let mut request = ChunkRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to read multipart field: {}", e);
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart field: {}", e),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_some() || name == "file" {
            let data = field.bytes().await.map_err(|e| {
                tracing::error!("Failed to read chunk bytes: {}", e);
                error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read chunk bytes: {}", e),
                )
            })?;
            tracing::trace!("Chunk payload field {} ({} bytes)", name, data.len());
            request.payload = Some(data);
        } else {
            let value = field.text().await.map_err(|e| {
                tracing::warn!("Failed to read form field {}: {}", name, e);
                error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read form field {}: {}", name, e),
                )
            })?;
            request.params.insert(name, value);
        }
    }

    Ok(request)
}

async fn run_upload(
    state: &AppState,
    instance: Option<&str>,
    request: ChunkRequest,
) -> Result<Response, HandlerError> {
    let mut coordinator = UploadCoordinator::new(&state.config, instance).map_err(|e| {
        tracing::warn!("Rejected upload request: {}", e);
        error_response(StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let status = match coordinator.process(&request).await {
        Ok(Some(status)) => status,
        Ok(None) => {
            tracing::warn!("Request carried no resumable upload parameters");
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "No resumable upload parameters provided",
            ));
        }
        Err(e) => {
            tracing::error!("Upload failed: {}", e);
            let status = match &e {
                UploadError::InvalidInstance(_) => StatusCode::BAD_REQUEST,
                UploadError::CreateDir { .. } | UploadError::WriteChunk { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            return Err(error_response(status, e.to_string()));
        }
    };

    if status == UploadStatus::Created {
        tracing::info!(
            "📦 Upload complete: {}",
            coordinator.stored_file_name().unwrap_or_default()
        );
    }

    Ok(status_response(status, &coordinator))
}

fn status_response(status: UploadStatus, coordinator: &UploadCoordinator) -> Response {
    match status {
        UploadStatus::NotFound => StatusCode::NO_CONTENT.into_response(),
        UploadStatus::Accepted => (
            StatusCode::OK,
            Json(UploadStatusResponse {
                status: "accepted",
                complete: false,
                filename: None,
                extension: None,
            }),
        )
            .into_response(),
        UploadStatus::Created => (
            StatusCode::CREATED,
            Json(UploadStatusResponse {
                status: "created",
                complete: coordinator.is_upload_complete(),
                filename: coordinator.stored_file_name(),
                extension: coordinator.extension().map(str::to_string),
            }),
        )
            .into_response(),
    }
}
