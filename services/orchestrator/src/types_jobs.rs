use std::path::Path;
use std::str::FromStr;

use jobstate::{JobKind, JobRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }

    /// Media kind implied by an upload's file extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        if yolo_archive::IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Photo)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(MediaKind::Photo),
            "video" => Ok(MediaKind::Video),
            other => Err(anyhow::anyhow!("unknown media kind '{other}'")),
        }
    }
}

/// Alphanumeric only, so `{name}.{ext}` stays one file name.
pub fn is_model_ext(ext: &str) -> bool {
    !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn default_model_ext() -> String {
    "pt".to_string()
}

/// What a queued job should do. The tag doubles as the job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    ValidateArchive {
        dataset_id: Uuid,
    },
    MergeAndTrain {
        model_name: String,
        #[serde(default = "default_model_ext")]
        model_ext: String,
        /// Next free version when absent.
        #[serde(default)]
        version: Option<i32>,
        base_model: String,
        dataset_ids: Vec<Uuid>,
    },
    Deploy {
        model_name: String,
        /// Latest registered version when absent.
        #[serde(default)]
        version: Option<i32>,
    },
    Undeploy {
        model_name: String,
    },
    /// Renders a previously uploaded source file.
    GenerateInference {
        request_id: Uuid,
        model_name: String,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::ValidateArchive { .. } => JobKind::ValidateArchive,
            JobPayload::MergeAndTrain { .. } => JobKind::MergeAndTrain,
            JobPayload::Deploy { .. } => JobKind::Deploy,
            JobPayload::Undeploy { .. } => JobKind::Undeploy,
            JobPayload::GenerateInference { .. } => JobKind::GenerateInference,
        }
    }

    /// Tracked identity: the dataset for validation, the model for
    /// train/deploy/undeploy, the request for inference.
    pub fn job_ref(&self) -> jobstate::Result<JobRef> {
        let id = match self {
            JobPayload::ValidateArchive { dataset_id } => dataset_id.to_string(),
            JobPayload::MergeAndTrain { model_name, .. }
            | JobPayload::Deploy { model_name, .. }
            | JobPayload::Undeploy { model_name } => model_name.clone(),
            JobPayload::GenerateInference { request_id, .. } => request_id.to_string(),
        };
        JobRef::new(self.kind(), id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: Uuid,
    pub payload: JobPayload,
}
