use std::collections::HashMap;

use anyhow::Context;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use jobstate::{JobKind, JobRef, JobStatus, StatusEntry};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::repository::InferenceRecord;
use crate::routes_jobs::ApiError;
use crate::state::SharedState;
use crate::types_jobs::MediaKind;
use crate::uploads::{attachment_name, remove_file, store_upload, upload_extension};

#[derive(Debug, Serialize)]
pub struct InferenceListItem {
    #[serde(flatten)]
    pub inference: InferenceRecord,
    pub status: Option<String>,
}

/// Stores a photo or video for later rendering and registers it at READY.
/// Rendering is requested with a `generate_inference` job naming the
/// returned `request_id`.
pub async fn post_inference(
    State(state): State<SharedState>,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<InferenceRecord>), ApiError> {
    let mut upload: Option<(String, bytes::Bytes)> = None;

    while let Some(field) = mp.next_field().await.map_err(|e| ApiError::BadRequest(e.to_string()))? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
            upload = Some((file_name, bytes));
        }
    }

    let (file_name, bytes) = upload
        .filter(|(_, b)| !b.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing file".into()))?;
    let media = MediaKind::from_file_name(&file_name)
        .ok_or_else(|| ApiError::BadRequest(format!("{file_name:?} is neither a supported image nor a video")))?;
    let ext = upload_extension(&file_name)
        .ok_or_else(|| ApiError::BadRequest(format!("{file_name:?} has no usable extension")))?;

    let request_id = Uuid::new_v4();
    let dir = state.config.inference_dir.join("uploads");
    let source_path = dir.join(format!("{request_id}.{ext}"));
    store_upload(&dir, &source_path, request_id, &bytes).await?;

    let record = InferenceRecord {
        request_id,
        file_name,
        media,
        source_path,
        size_bytes: bytes.len() as i64,
        model_name: None,
        output_path: None,
    };
    state.inferences.register(&record).await?;
    state
        .tracker
        .set_status(
            &JobRef::new(JobKind::GenerateInference, request_id.to_string())?,
            JobStatus::Ready,
        )
        .await?;
    info!(%request_id, media = media.as_str(), size = record.size_bytes, "inference source stored");

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_inferences(State(state): State<SharedState>) -> Result<Json<Vec<InferenceListItem>>, ApiError> {
    let rows = state.inferences.list().await?;
    let statuses = state.tracker.get_status_list(JobKind::GenerateInference).await?;
    Ok(Json(with_status(rows, statuses)))
}

fn with_status(rows: Vec<InferenceRecord>, statuses: Vec<StatusEntry>) -> Vec<InferenceListItem> {
    let by_id: HashMap<String, String> = statuses.into_iter().map(|e| (e.id, e.status)).collect();
    rows.into_iter()
        .map(|inference| InferenceListItem {
            status: by_id.get(&inference.request_id.to_string()).cloned(),
            inference,
        })
        .collect()
}

/// The rendered file, once there is one.
pub async fn download_inference(
    State(state): State<SharedState>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .inferences
        .get(request_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no inference {request_id}")))?;
    let output = record
        .output_path
        .ok_or_else(|| ApiError::NotFound(format!("inference {request_id} has not been rendered")))?;

    let body = tokio::fs::read(&output)
        .await
        .with_context(|| format!("read {}", output.display()))?;
    let disposition = format!("attachment; filename=\"detection_{}\"", attachment_name(&record.file_name));

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// Drops the record, then the uploaded source and any rendered output.
pub async fn delete_inference(
    State(state): State<SharedState>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<InferenceRecord>, ApiError> {
    let record = state
        .inferences
        .delete(request_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no inference {request_id}")))?;
    remove_file(&record.source_path).await?;
    if let Some(output) = &record.output_path {
        remove_file(output).await?;
    }
    info!(%request_id, "inference deleted");
    Ok(Json(record))
}
