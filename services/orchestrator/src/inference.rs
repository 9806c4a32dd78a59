use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::types_jobs::MediaKind;

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub model_name: String,
    pub media: MediaKind,
    pub source: PathBuf,
    pub classes: Vec<String>,
    pub output: PathBuf,
}

#[async_trait]
pub trait InferenceRenderer: Send + Sync {
    /// Draws detections onto `request.source`; returns the written file.
    async fn render(&self, request: &RenderRequest) -> Result<PathBuf>;
}

pub struct SubprocessRenderer {
    pub python: String,
    pub script: PathBuf,
    pub server_url: String,
}

#[async_trait]
impl InferenceRenderer for SubprocessRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<PathBuf> {
        if let Some(dir) = request.output.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let classes = serde_json::to_string(&request.classes)?;

        let output = Command::new(&self.python)
            .arg(&self.script)
            .arg("--source")
            .arg(&request.source)
            .arg("--media")
            .arg(request.media.as_str())
            .arg("--model")
            .arg(&request.model_name)
            .arg("--classes")
            .arg(classes)
            .arg("--output")
            .arg(&request.output)
            .arg("--server")
            .arg(&self.server_url)
            .stdin(Stdio::null())
            .output()
            .await
            .context("failed to spawn renderer")?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!(model = %request.model_name, "renderer: {line}");
        }
        if !output.status.success() {
            bail!("renderer exit status: {}", output.status);
        }
        if !request.output.is_file() {
            bail!("renderer produced no file at {}", request.output.display());
        }
        info!(model = %request.model_name, media = request.media.as_str(), output = %request.output.display(), "inference rendered");
        Ok(request.output.clone())
    }
}

/// `<dir>/detection_<source file name>`
pub fn output_path_for(dir: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    dir.join(format!("detection_{name}"))
}
