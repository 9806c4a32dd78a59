use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jobstate::{JobKind, JobStatus, JobStatusTracker, StatusEntry, StatusView, StoreError};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::broker::JobSink;
use crate::state::{AppState, SharedState};
use crate::types_jobs::{is_model_ext, JobPayload};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Backend(_) => ApiError::Internal(e.into()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(e) => {
                error!(error = ?e, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct JobSubmitted {
    pub message_id: Uuid,
    pub kind: JobKind,
    pub id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub kind: JobKind,
    pub id: String,
    #[serde(flatten)]
    pub view: StatusView,
}

pub async fn submit(state: &AppState, payload: JobPayload) -> Result<JobSubmitted, ApiError> {
    submit_to(&state.tracker, &state.queue, payload).await
}

/// Records PENDING, then queues the message. If the message cannot be
/// queued the job is marked FAILED so it never sits PENDING with nothing
/// behind it.
pub async fn submit_to(
    tracker: &JobStatusTracker,
    sink: &dyn JobSink,
    payload: JobPayload,
) -> Result<JobSubmitted, ApiError> {
    check_payload(&payload)?;
    let job = payload.job_ref()?;
    tracker.set_status(&job, JobStatus::Pending).await?;
    let message = match sink.enqueue(payload).await {
        Ok(message) => message,
        Err(e) => {
            if let Err(mark) = tracker.set_status(&job, JobStatus::Failed).await {
                error!(job_id = %job.id, kind = %job.kind, error = %mark, "could not mark unqueued job failed");
            }
            return Err(ApiError::Internal(e.context(format!("queue {job}"))));
        }
    };

    Ok(JobSubmitted {
        message_id: message.id,
        kind: job.kind,
        id: job.id,
        status: JobStatus::Pending,
    })
}

fn check_payload(payload: &JobPayload) -> Result<(), ApiError> {
    match payload {
        JobPayload::MergeAndTrain { dataset_ids, .. } if dataset_ids.is_empty() => {
            Err(ApiError::BadRequest("dataset_ids must not be empty".into()))
        }
        JobPayload::MergeAndTrain {
            version: Some(v), ..
        }
        | JobPayload::Deploy {
            version: Some(v), ..
        } if *v < 1 => Err(ApiError::BadRequest("version must be at least 1".into())),
        JobPayload::MergeAndTrain { model_ext, .. } if !is_model_ext(model_ext) => Err(ApiError::BadRequest(format!(
            "model_ext {model_ext:?} must be alphanumeric"
        ))),
        _ => Ok(()),
    }
}

pub async fn post_job(
    State(state): State<SharedState>,
    Json(payload): Json<JobPayload>,
) -> Result<(StatusCode, Json<JobSubmitted>), ApiError> {
    let submitted = submit(&state, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(submitted)))
}

pub async fn get_jobs(
    State(state): State<SharedState>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<StatusEntry>>, ApiError> {
    let kind: JobKind = kind.parse()?;
    Ok(Json(state.tracker.get_status_list(kind).await?))
}

pub async fn get_job(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let kind: JobKind = kind.parse()?;
    let job = jobstate::JobRef::new(kind, id)?;
    let view = state
        .tracker
        .get_status(&job)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no {kind} job {}", job.id)))?;

    Ok(Json(JobStatusResponse {
        kind,
        id: job.id,
        view,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use jobstate::{InMemoryProgressStore, InMemoryStatusStore, JobRef};
    use uuid::Uuid;

    use super::*;
    use crate::types_jobs::JobMessage;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<JobPayload>>);

    #[async_trait]
    impl JobSink for RecordingSink {
        async fn enqueue(&self, payload: JobPayload) -> anyhow::Result<JobMessage> {
            self.0.lock().unwrap().push(payload.clone());
            Ok(JobMessage {
                id: Uuid::new_v4(),
                payload,
            })
        }
    }

    struct DownSink;

    #[async_trait]
    impl JobSink for DownSink {
        async fn enqueue(&self, _payload: JobPayload) -> anyhow::Result<JobMessage> {
            anyhow::bail!("pool timed out")
        }
    }

    fn tracker() -> JobStatusTracker {
        JobStatusTracker::new(Arc::new(InMemoryStatusStore::new()), Arc::new(InMemoryProgressStore::new()))
    }

    async fn status_of(tracker: &JobStatusTracker, kind: JobKind, id: &str) -> Option<JobStatus> {
        let job = JobRef::new(kind, id).unwrap();
        tracker.get_status(&job).await.unwrap().map(|v| v.status)
    }

    #[tokio::test]
    async fn queued_job_is_pending() {
        let t = tracker();
        let sink = RecordingSink::default();

        let submitted = submit_to(&t, &sink, JobPayload::Undeploy { model_name: "cars".into() })
            .await
            .unwrap();

        assert_eq!(submitted.status, JobStatus::Pending);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert_eq!(status_of(&t, JobKind::Undeploy, "cars").await, Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn unqueued_job_is_failed_not_pending() {
        let t = tracker();

        let err = submit_to(&t, &DownSink, JobPayload::Undeploy { model_name: "cars".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(status_of(&t, JobKind::Undeploy, "cars").await, Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn path_like_model_name_is_rejected_before_any_write() {
        let t = tracker();
        let sink = RecordingSink::default();

        let err = submit_to(&t, &sink, JobPayload::Undeploy { model_name: "../../etc".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(sink.0.lock().unwrap().is_empty());
        assert!(t.get_status_list(JobKind::Undeploy).await.unwrap().is_empty());
    }

    #[test]
    fn errors_map_to_status_codes() {
        let r = ApiError::from(StoreError::UnknownKind("x".into())).into_response();
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let r = ApiError::from(StoreError::Backend("down".into())).into_response();
        assert_eq!(r.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let r = ApiError::NotFound("nope".into()).into_response();
        assert_eq!(r.status(), StatusCode::NOT_FOUND);
        let r = ApiError::Conflict("served".into()).into_response();
        assert_eq!(r.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn training_needs_datasets() {
        let p = JobPayload::MergeAndTrain {
            model_name: "m".into(),
            model_ext: "pt".into(),
            version: None,
            base_model: "yolov8n.pt".into(),
            dataset_ids: vec![],
        };
        assert!(matches!(check_payload(&p), Err(ApiError::BadRequest(_))));

        let p = JobPayload::Deploy {
            model_name: "m".into(),
            version: Some(0),
        };
        assert!(matches!(check_payload(&p), Err(ApiError::BadRequest(_))));

        let p = JobPayload::Undeploy { model_name: "m".into() };
        assert!(check_payload(&p).is_ok());

        let p = JobPayload::MergeAndTrain {
            model_name: "m".into(),
            model_ext: "../pt".into(),
            version: None,
            base_model: "yolov8n.pt".into(),
            dataset_ids: vec![Uuid::new_v4()],
        };
        assert!(matches!(check_payload(&p), Err(ApiError::BadRequest(_))));
    }
}
