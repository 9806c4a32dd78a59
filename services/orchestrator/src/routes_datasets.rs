use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use jobstate::{JobKind, JobRef, JobStatus};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::repository::DatasetRecord;
use crate::routes_jobs::{submit, ApiError, JobSubmitted};
use crate::state::SharedState;
use crate::types_jobs::JobPayload;
use crate::uploads::{remove_file, store_upload};

#[derive(Serialize)]
pub struct DatasetUploaded {
    pub dataset: DatasetRecord,
    pub validation: JobSubmitted,
}

#[derive(Serialize)]
pub struct DatasetListItem {
    #[serde(flatten)]
    pub dataset: DatasetRecord,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Stores an uploaded zip, registers it at READY and queues validation.
pub async fn post_dataset(
    State(state): State<SharedState>,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<DatasetUploaded>), ApiError> {
    let mut name: Option<String> = None;
    let mut file_bytes: Option<bytes::Bytes> = None;

    while let Some(field) = mp.next_field().await.map_err(|e| ApiError::BadRequest(e.to_string()))? {
        match field.name() {
            Some("name") => name = Some(field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?),
            Some("file") => file_bytes = Some(field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?),
            _ => {}
        }
    }

    let name = name.unwrap_or_else(|| "dataset".to_string());
    let bytes = file_bytes
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing file".into()))?;

    let id = Uuid::new_v4();
    let dir = &state.config.dataset_dir;
    let final_path = dir.join(format!("{id}.zip"));
    store_upload(dir, &final_path, id, &bytes).await?;

    let record = DatasetRecord {
        id,
        name,
        file_path: final_path,
        size_bytes: bytes.len() as i64,
        content_hash: hex::encode(blake3::hash(&bytes).as_bytes()),
    };
    state.archives.register(&record).await?;
    state
        .tracker
        .set_status(&JobRef::new(JobKind::ValidateArchive, id.to_string())?, JobStatus::Ready)
        .await?;
    info!(dataset_id = %id, size = record.size_bytes, hash = %record.content_hash, "dataset stored");

    let validation = submit(&state, JobPayload::ValidateArchive { dataset_id: id }).await?;
    Ok((StatusCode::CREATED, Json(DatasetUploaded { dataset: record, validation })))
}

pub async fn get_datasets(State(state): State<SharedState>) -> Result<Json<Vec<DatasetListItem>>, ApiError> {
    let rows = state.archives.list().await?;
    Ok(Json(
        rows.into_iter()
            .map(|(dataset, created_at)| DatasetListItem { dataset, created_at })
            .collect(),
    ))
}

/// Drops the dataset row, then its archive file.
pub async fn delete_dataset(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DatasetRecord>, ApiError> {
    let record = state
        .archives
        .delete(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no dataset {id}")))?;
    remove_file(&record.file_path).await?;
    info!(dataset_id = %id, path = %record.file_path.display(), "dataset deleted");
    Ok(Json(record))
}
