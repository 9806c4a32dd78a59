use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
pub trait ModelServer: Send + Sync {
    /// Publishes `artifact` as `name`/`version`; returns the served path.
    async fn deploy(&self, name: &str, version: i32, artifact: &Path) -> Result<PathBuf>;
    async fn undeploy(&self, name: &str) -> Result<()>;
}

/// Triton with an explicit-mode model repository on a shared volume.
pub struct TritonModelServer {
    base_url: String,
    repo: PathBuf,
    client: reqwest::Client,
}

impl TritonModelServer {
    pub fn new(base_url: String, repo: PathBuf) -> Self {
        Self {
            base_url,
            repo,
            client: reqwest::Client::new(),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/v2/health/live", self.base_url.trim_end_matches('/'));
        self.client.get(url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn control(&self, name: &str, action: &str) -> Result<()> {
        let url = format!(
            "{}/v2/repository/models/{name}/{action}",
            self.base_url.trim_end_matches('/')
        );
        self.client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("triton {action} request failed"))?
            .error_for_status()
            .with_context(|| format!("triton refused to {action} {name}"))?;
        Ok(())
    }
}

#[async_trait]
impl ModelServer for TritonModelServer {
    async fn deploy(&self, name: &str, version: i32, artifact: &Path) -> Result<PathBuf> {
        let model_dir = self.repo.join(name);
        let version_dir = model_dir.join(version.to_string());
        tokio::fs::create_dir_all(&version_dir)
            .await
            .with_context(|| format!("create {}", version_dir.display()))?;

        let dest = version_dir.join("model.onnx");
        tokio::fs::copy(artifact, &dest)
            .await
            .with_context(|| format!("copy {} -> {}", artifact.display(), dest.display()))?;
        tokio::fs::write(model_dir.join("config.pbtxt"), model_config(name)).await?;

        self.control(name, "load").await?;
        info!(model = name, version, served = %dest.display(), "model loaded");
        Ok(dest)
    }

    async fn undeploy(&self, name: &str) -> Result<()> {
        self.control(name, "unload").await?;

        let model_dir = self.repo.join(name);
        match tokio::fs::remove_dir_all(&model_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(model = name, "model directory already gone");
            }
            Err(e) => return Err(e).with_context(|| format!("remove {}", model_dir.display())),
        }
        info!(model = name, "model unloaded");
        Ok(())
    }
}

/// Output tensors are left to Triton's auto-complete.
pub fn model_config(name: &str) -> String {
    format!(
        r#"name: "{name}"
platform: "onnxruntime_onnx"
max_batch_size: 10
input [
  {{
    name: "images"
    data_type: TYPE_FP32
    dims: [ 3, 640, 640 ]
  }}
]
"#
    )
}
