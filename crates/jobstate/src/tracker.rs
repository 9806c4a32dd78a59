//! Durable status plus ephemeral progress, merged on read.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::keyspace::ProgressKeyspace;
use crate::status::{JobKind, JobRef, JobStatus};
use crate::store::{DurableStatusStore, EphemeralProgressStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

impl StatusView {
    /// Progress when present, otherwise the durable status.
    pub fn effective(&self) -> String {
        self.progress.clone().unwrap_or_else(|| self.status.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub id: String,
    pub status: String,
}

#[derive(Clone)]
pub struct JobStatusTracker {
    durable: Arc<dyn DurableStatusStore>,
    ephemeral: Arc<dyn EphemeralProgressStore>,
}

impl JobStatusTracker {
    pub fn new(durable: Arc<dyn DurableStatusStore>, ephemeral: Arc<dyn EphemeralProgressStore>) -> Self {
        Self { durable, ephemeral }
    }

    /// Overwrites the durable status. Transitions are not checked.
    pub async fn set_status(&self, job: &JobRef, status: JobStatus) -> Result<()> {
        self.durable.set_status(job, status).await?;
        info!(job_id = %job.id, kind = %job.kind, %status, "job status");
        Ok(())
    }

    pub async fn set_progress(&self, job: &JobRef, value: &str) -> Result<()> {
        let key = ProgressKeyspace::for_kind(job.kind).key(&job.id);
        self.ephemeral.set(&key, value).await?;
        debug!(job_id = %job.id, kind = %job.kind, progress = value, "job progress");
        Ok(())
    }

    pub async fn clear_progress(&self, job: &JobRef) -> Result<usize> {
        let removed = ProgressKeyspace::for_kind(job.kind)
            .clear(self.ephemeral.as_ref(), job)
            .await?;
        debug!(job_id = %job.id, kind = %job.kind, removed, "job progress cleared");
        Ok(removed)
    }

    pub async fn read_effective_status(&self, job: &JobRef) -> Result<Option<String>> {
        let key = ProgressKeyspace::for_kind(job.kind).key(&job.id);
        if let Some(progress) = self.ephemeral.get(&key).await? {
            return Ok(Some(progress));
        }
        Ok(self.durable.get_status(job).await?.map(|s| s.to_string()))
    }

    /// `None` for a job that never received a durable status.
    pub async fn get_status(&self, job: &JobRef) -> Result<Option<StatusView>> {
        let Some(status) = self.durable.get_status(job).await? else {
            return Ok(None);
        };
        let key = ProgressKeyspace::for_kind(job.kind).key(&job.id);
        let progress = self.ephemeral.get(&key).await?;
        Ok(Some(StatusView { status, progress }))
    }

    /// Every durably known job of `kind`, with progress overriding status
    /// where present. Stray progress keys without a durable row are ignored.
    pub async fn get_status_list(&self, kind: JobKind) -> Result<Vec<StatusEntry>> {
        let rows = self.durable.list_statuses(kind).await?;
        let mut progress: std::collections::HashMap<String, String> = ProgressKeyspace::for_kind(kind)
            .entries(self.ephemeral.as_ref())
            .await?
            .into_iter()
            .collect();

        Ok(rows
            .into_iter()
            .map(|(id, status)| {
                let status = progress.remove(&id).unwrap_or_else(|| status.to_string());
                StatusEntry { id, status }
            })
            .collect())
    }
}
