use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle of one job attempt: READY -> PENDING -> RUNNING -> COMPLETE | FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ready,
    Pending,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ready" => Ok(JobStatus::Ready),
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(StoreError::UnknownStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ValidateArchive,
    MergeAndTrain,
    Deploy,
    Undeploy,
    GenerateInference,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::ValidateArchive,
        JobKind::MergeAndTrain,
        JobKind::Deploy,
        JobKind::Undeploy,
        JobKind::GenerateInference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ValidateArchive => "validate_archive",
            JobKind::MergeAndTrain => "merge_and_train",
            JobKind::Deploy => "deploy",
            JobKind::Undeploy => "undeploy",
            JobKind::GenerateInference => "generate_inference",
        }
    }

    /// Prefix of this kind's ephemeral progress keys.
    pub fn namespace(&self) -> &'static str {
        match self {
            JobKind::ValidateArchive => "valid",
            JobKind::MergeAndTrain => "train",
            JobKind::Deploy => "deploy",
            JobKind::Undeploy => "undeploy",
            JobKind::GenerateInference => "inference",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| StoreError::UnknownKind(s.to_string()))
    }
}

/// Identity of a tracked job: its kind plus a caller-chosen id
/// (dataset id, model name, request id). Ids double as file-name
/// components, so they are restricted to one plain path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef {
    pub kind: JobKind,
    pub id: String,
}

impl JobRef {
    pub fn new(kind: JobKind, id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if !is_plain_segment(&id) {
            return Err(StoreError::InvalidJobId(id));
        }
        Ok(Self { kind, id })
    }
}

/// `[A-Za-z0-9_.-]+`, excluding `.` and `..`.
pub fn is_plain_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.namespace(), self.id)
    }
}
