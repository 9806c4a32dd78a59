//! Runs one queued stage to a terminal status.
//!
//! RUNNING is committed before any work starts. The stage body runs on its
//! own task, so errors and panics both end in FAILED. On success, artifacts
//! are persisted first and COMPLETE is the last durable write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use jobstate::{JobRef, JobStatus, JobStatusTracker};
use tracing::{error, info, warn};
use uuid::Uuid;
use yolo_archive::{merge_with, MergeOptions, MANIFEST_FILE};

use crate::inference::{output_path_for, InferenceRenderer, RenderRequest};
use crate::model_server::ModelServer;
use crate::repository::{next_version, ArchiveRepository, InferenceRepository, ModelRecord, ModelRepository};
use crate::trainer::{ProgressReporter, TrackerProgress, Trainer};
use crate::types_jobs::{is_model_ext, JobMessage, JobPayload};
use crate::types_training::TrainingRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Failed,
    /// No terminal status could be recorded (or RUNNING never was); the
    /// message should be redelivered.
    NotStarted,
}

#[derive(Clone)]
pub struct Collaborators {
    pub archives: Arc<dyn ArchiveRepository>,
    pub models: Arc<dyn ModelRepository>,
    pub inferences: Arc<dyn InferenceRepository>,
    pub trainer: Arc<dyn Trainer>,
    pub server: Arc<dyn ModelServer>,
    pub renderer: Arc<dyn InferenceRenderer>,
}

#[derive(Debug, Clone)]
pub struct WorkDirs {
    /// Parent of the per-run merged datasets.
    pub merged: PathBuf,
    pub inference: PathBuf,
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    tracker: JobStatusTracker,
    collaborators: Collaborators,
    dirs: WorkDirs,
    merge_options: MergeOptions,
}

impl TaskOrchestrator {
    pub fn new(tracker: JobStatusTracker, collaborators: Collaborators, dirs: WorkDirs) -> Self {
        Self {
            tracker,
            collaborators,
            dirs,
            merge_options: MergeOptions::default(),
        }
    }

    pub fn with_merge_options(mut self, options: MergeOptions) -> Self {
        self.merge_options = options;
        self
    }

    pub async fn run(&self, message: &JobMessage) -> StageOutcome {
        let job = match message.payload.job_ref() {
            Ok(job) => job,
            Err(e) => {
                error!(message_id = %message.id, kind = %message.payload.kind(), error = %e, "job has no valid identity");
                return StageOutcome::Failed;
            }
        };

        if let Err(e) = self.tracker.set_status(&job, JobStatus::Running).await {
            error!(message_id = %message.id, job_id = %job.id, kind = %job.kind, error = %e, "could not mark job running");
            return StageOutcome::NotStarted;
        }

        let this = self.clone();
        let stage_job = job.clone();
        let payload = message.payload.clone();
        let joined = tokio::spawn(async move { this.execute(&stage_job, payload).await }).await;

        let failure = match joined {
            Ok(Ok(())) => return self.complete(&job).await,
            Ok(Err(e)) => e,
            Err(e) => anyhow!("stage aborted: {e}"),
        };
        self.fail(&job, failure).await
    }

    /// A job must not be left RUNNING: if COMPLETE cannot be written, FAILED
    /// is tried, and if that fails too the message goes back for redelivery.
    async fn complete(&self, job: &JobRef) -> StageOutcome {
        self.clear_progress(job).await;
        let Err(e) = self.tracker.set_status(job, JobStatus::Complete).await else {
            info!(job_id = %job.id, kind = %job.kind, "stage complete");
            return StageOutcome::Completed;
        };
        error!(job_id = %job.id, kind = %job.kind, error = %e, "could not mark job complete");
        match self.tracker.set_status(job, JobStatus::Failed).await {
            Ok(()) => StageOutcome::Failed,
            Err(e) => {
                error!(job_id = %job.id, kind = %job.kind, error = %e, "could not mark job failed either");
                StageOutcome::NotStarted
            }
        }
    }

    async fn fail(&self, job: &JobRef, failure: anyhow::Error) -> StageOutcome {
        error!(job_id = %job.id, kind = %job.kind, error = ?failure, "stage failed");
        self.clear_progress(job).await;
        if let Err(e) = self.tracker.set_status(job, JobStatus::Failed).await {
            error!(job_id = %job.id, kind = %job.kind, error = %e, "could not mark job failed");
        }
        StageOutcome::Failed
    }

    async fn clear_progress(&self, job: &JobRef) {
        if let Err(e) = self.tracker.clear_progress(job).await {
            warn!(job_id = %job.id, kind = %job.kind, error = %e, "progress not cleared");
        }
    }

    async fn execute(&self, job: &JobRef, payload: JobPayload) -> Result<()> {
        match payload {
            JobPayload::ValidateArchive { dataset_id } => self.validate_archive(dataset_id).await,
            JobPayload::MergeAndTrain {
                model_name,
                model_ext,
                version,
                base_model,
                dataset_ids,
            } => {
                self.merge_and_train(job, model_name, model_ext, version, base_model, &dataset_ids)
                    .await
            }
            JobPayload::Deploy { model_name, version } => self.deploy(&model_name, version).await,
            JobPayload::Undeploy { model_name } => self.undeploy(&model_name).await,
            JobPayload::GenerateInference { request_id, model_name } => {
                self.generate_inference(request_id, &model_name).await
            }
        }
    }

    async fn validate_archive(&self, dataset_id: Uuid) -> Result<()> {
        let path = self.archive_path(dataset_id).await?;
        let checked = path.clone();
        let valid = blocking(move || yolo_archive::validate(&checked)).await?;
        if !valid {
            bail!("{} is not a valid YOLO dataset", path.display());
        }
        Ok(())
    }

    async fn merge_and_train(
        &self,
        job: &JobRef,
        model_name: String,
        model_ext: String,
        version: Option<i32>,
        base_model: String,
        dataset_ids: &[Uuid],
    ) -> Result<()> {
        if dataset_ids.is_empty() {
            bail!("no datasets to train {model_name} on");
        }
        if !is_model_ext(&model_ext) {
            bail!("model extension {model_ext:?} is not a plain file extension");
        }
        let version = match version {
            Some(v) => v,
            None => next_version(self.collaborators.models.latest_version(&model_name).await?),
        };

        let mut archives = Vec::with_capacity(dataset_ids.len());
        for id in dataset_ids {
            archives.push(self.archive_path(*id).await?);
        }

        let progress = TrackerProgress::new(&self.tracker, job);
        progress.report("merging".to_string()).await;

        tokio::fs::create_dir_all(&self.dirs.merged)
            .await
            .with_context(|| format!("create {}", self.dirs.merged.display()))?;
        let workspace = self.dirs.merged.join(format!(
            "{model_name}_v{version}_{}",
            Utc::now().format("%Y%m%d%H%M%S%3f")
        ));

        let out = workspace.clone();
        let options = self.merge_options.clone();
        let merged = blocking(move || merge_with(&archives, &out, &options)).await?;
        if !merged.success {
            discard_workspace(&workspace).await;
            bail!("merging {} archives for {model_name} failed", dataset_ids.len());
        }

        let request = TrainingRequest {
            model_name: model_name.clone(),
            model_ext,
            version,
            base_model,
            data_yaml: workspace.join(MANIFEST_FILE),
        };
        let trained = self.collaborators.trainer.train(&request, &progress).await;
        discard_workspace(&workspace).await;
        let trained = trained?;

        self.collaborators
            .models
            .register(&ModelRecord {
                name: model_name.clone(),
                version,
                file_path: trained.artifact_path,
                classes: merged.classes.into_iter().collect(),
                metrics: trained.metrics,
                served_path: None,
            })
            .await?;
        info!(model = %model_name, version, map50 = trained.metrics.map50, "model registered");
        Ok(())
    }

    async fn deploy(&self, model_name: &str, version: Option<i32>) -> Result<()> {
        let models = &self.collaborators.models;
        let model = models
            .find(model_name, version)
            .await?
            .ok_or_else(|| anyhow!("model {model_name} (version {version:?}) is not registered"))?;

        let served = self
            .collaborators
            .server
            .deploy(model_name, model.version, &model.file_path)
            .await?;
        models.set_served(model_name, model.version, &served).await?;
        Ok(())
    }

    async fn undeploy(&self, model_name: &str) -> Result<()> {
        self.collaborators.server.undeploy(model_name).await?;
        self.collaborators.models.clear_served(model_name).await?;
        Ok(())
    }

    async fn generate_inference(&self, request_id: Uuid, model_name: &str) -> Result<()> {
        let upload = self
            .collaborators
            .inferences
            .get(request_id)
            .await?
            .ok_or_else(|| anyhow!("inference upload {request_id} is not registered"))?;
        let model = self
            .collaborators
            .models
            .deployed(model_name)
            .await?
            .ok_or_else(|| anyhow!("model {model_name} is not deployed"))?;

        let request = RenderRequest {
            model_name: model_name.to_string(),
            media: upload.media,
            output: output_path_for(&self.dirs.inference, &upload.source_path),
            source: upload.source_path,
            classes: model.classes,
        };
        let output_path = self.collaborators.renderer.render(&request).await?;

        self.collaborators
            .inferences
            .record_output(request_id, model_name, &output_path)
            .await?;
        info!(%request_id, model = model_name, output = %output_path.display(), "inference rendered");
        Ok(())
    }

    async fn archive_path(&self, dataset_id: Uuid) -> Result<PathBuf> {
        let record = self
            .collaborators
            .archives
            .get(dataset_id)
            .await?
            .ok_or_else(|| anyhow!("dataset {dataset_id} is not registered"))?;
        Ok(record.file_path)
    }
}

async fn blocking<R, F>(f: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.context("blocking task failed")
}

async fn discard_workspace(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "merged dataset not removed"),
    }
}
