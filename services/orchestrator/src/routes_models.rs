use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use jobstate::{JobKind, JobRef, StatusEntry};
use serde::Serialize;
use tracing::info;

use crate::repository::ModelRecord;
use crate::routes_jobs::ApiError;
use crate::state::SharedState;
use crate::uploads::remove_dir;

#[derive(Debug, Serialize)]
pub struct ModelListItem {
    #[serde(flatten)]
    pub model: ModelRecord,
    /// Effective training status of the model name, if one was ever tracked.
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelDeleted {
    pub name: String,
    pub versions: u64,
}

pub async fn get_models(State(state): State<SharedState>) -> Result<Json<Vec<ModelListItem>>, ApiError> {
    let models = state.models.list().await?;
    let statuses = state.tracker.get_status_list(JobKind::MergeAndTrain).await?;
    Ok(Json(with_status(models, statuses)))
}

fn with_status(models: Vec<ModelRecord>, statuses: Vec<StatusEntry>) -> Vec<ModelListItem> {
    let by_name: HashMap<String, String> = statuses.into_iter().map(|e| (e.id, e.status)).collect();
    models
        .into_iter()
        .map(|model| ModelListItem {
            status: by_name.get(&model.name).cloned(),
            model,
        })
        .collect()
}

/// Drops every version of a model and its artifacts. A served model has to
/// be undeployed first.
pub async fn delete_model(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<ModelDeleted>, ApiError> {
    let job = JobRef::new(JobKind::MergeAndTrain, name)?;
    if state.models.deployed(&job.id).await?.is_some() {
        return Err(ApiError::Conflict(format!("model {} is deployed; undeploy it first", job.id)));
    }

    let versions = state.models.delete(&job.id).await?;
    if versions == 0 {
        return Err(ApiError::NotFound(format!("no model {}", job.id)));
    }
    remove_dir(&state.config.model_dir.join(&job.id)).await?;
    info!(model = %job.id, versions, "model deleted");

    Ok(Json(ModelDeleted { name: job.id, versions }))
}
