//! Storage seams for job status.
//!
//! Statuses live in a durable store and survive restarts. Progress lives in
//! a fast ephemeral key/value store and may be lost at any time.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::status::{JobKind, JobRef, JobStatus};

#[async_trait]
pub trait DurableStatusStore: Send + Sync {
    async fn get_status(&self, job: &JobRef) -> Result<Option<JobStatus>>;

    async fn set_status(&self, job: &JobRef, status: JobStatus) -> Result<()>;

    /// Every `(id, status)` of one kind, ordered by id.
    async fn list_statuses(&self, kind: JobKind) -> Result<Vec<(String, JobStatus)>>;
}

#[async_trait]
pub trait EphemeralProgressStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Every `(key, value)` whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Removes `keys`; returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryStatusStore {
    rows: RwLock<HashMap<JobKind, BTreeMap<String, JobStatus>>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStatusStore for InMemoryStatusStore {
    async fn get_status(&self, job: &JobRef) -> Result<Option<JobStatus>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&job.kind).and_then(|m| m.get(&job.id)).copied())
    }

    async fn set_status(&self, job: &JobRef, status: JobStatus) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.entry(job.kind).or_default().insert(job.id.clone(), status);
        Ok(())
    }

    async fn list_statuses(&self, kind: JobKind) -> Result<Vec<(String, JobStatus)>> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&kind)
            .map(|m| m.iter().map(|(id, s)| (id.clone(), *s)).collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EphemeralProgressStore for InMemoryProgressStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut entries = self.entries.write().await;
        Ok(keys.iter().filter(|k| entries.remove(k.as_str()).is_some()).count())
    }
}
