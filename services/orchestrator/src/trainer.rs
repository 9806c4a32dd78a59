use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use jobstate::{JobRef, JobStatusTracker};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::types_training::{TrainingEvent, TrainingMetrics, TrainingOutcome, TrainingRequest};

/// Receives advisory progress from long-running collaborators.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, value: String);
}

/// Writes progress to the job's ephemeral key. Failures are logged only.
pub struct TrackerProgress<'a> {
    tracker: &'a JobStatusTracker,
    job: &'a JobRef,
}

impl<'a> TrackerProgress<'a> {
    pub fn new(tracker: &'a JobStatusTracker, job: &'a JobRef) -> Self {
        Self { tracker, job }
    }
}

#[async_trait]
impl ProgressReporter for TrackerProgress<'_> {
    async fn report(&self, value: String) {
        if let Err(e) = self.tracker.set_progress(self.job, &value).await {
            warn!(job_id = %self.job.id, error = %e, "progress write failed");
        }
    }
}

#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, request: &TrainingRequest, progress: &dyn ProgressReporter) -> Result<TrainingOutcome>;
}

/// Runs the training script and follows its NDJSON event stream.
pub struct SubprocessTrainer {
    pub python: String,
    pub script: PathBuf,
    pub epochs: u32,
    pub imgsz: u32,
    pub model_dir: PathBuf,
}

impl SubprocessTrainer {
    fn command(&self, request: &TrainingRequest) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg(&self.script)
            .arg("--data")
            .arg(&request.data_yaml)
            .arg("--base-model")
            .arg(&request.base_model)
            .arg("--epochs")
            .arg(self.epochs.to_string())
            .arg("--imgsz")
            .arg(self.imgsz.to_string());
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        cmd
    }

    /// `MODEL_DIR/<name>/<version>/<name>.<ext>`
    pub fn artifact_path(&self, request: &TrainingRequest) -> PathBuf {
        self.model_dir
            .join(&request.model_name)
            .join(request.version.to_string())
            .join(format!("{}.{}", request.model_name, request.model_ext))
    }
}

#[async_trait]
impl Trainer for SubprocessTrainer {
    async fn train(&self, request: &TrainingRequest, progress: &dyn ProgressReporter) -> Result<TrainingOutcome> {
        let mut child = self.command(request).spawn().context("failed to spawn trainer")?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("trainer has no stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let model = request.model_name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(model = %model, "trainer: {line}");
                }
            });
        }

        let mut result: Option<(String, TrainingMetrics)> = None;
        let mut failure: Option<String> = None;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_event(&line) {
                Some(TrainingEvent::Progress { epoch, epochs }) => {
                    info!(model = %request.model_name, epoch, epochs, "epoch completed");
                    progress.report(format!("{epoch}/{epochs}")).await;
                }
                Some(TrainingEvent::Done {
                    model_path,
                    map50,
                    map50_95,
                    precision,
                    recall,
                }) => {
                    result = Some((
                        model_path,
                        TrainingMetrics {
                            map50,
                            map50_95,
                            precision,
                            recall,
                        },
                    ));
                }
                Some(TrainingEvent::Error { message }) => failure = Some(message),
                None => debug!(model = %request.model_name, "trainer stdout: {line}"),
            }
        }

        let status = child.wait().await.context("trainer wait failed")?;
        if let Some(message) = failure {
            bail!("trainer reported error: {message}");
        }
        if !status.success() {
            bail!("trainer exit status: {status}");
        }
        let Some((best, metrics)) = result else {
            bail!("trainer exited without a result");
        };

        let artifact_path = self.artifact_path(request);
        store_artifact(Path::new(&best), &artifact_path).await?;
        info!(model = %request.model_name, version = request.version, artifact = %artifact_path.display(), "model stored");

        Ok(TrainingOutcome {
            artifact_path,
            metrics,
        })
    }
}

/// `None` for blank or non-event lines.
pub fn parse_event(line: &str) -> Option<TrainingEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

async fn store_artifact(src: &Path, dest: &Path) -> Result<()> {
    if let Some(dir) = dest.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;
    }
    tokio::fs::copy(src, dest)
        .await
        .with_context(|| format!("copy {} -> {}", src.display(), dest.display()))?;
    Ok(())
}
