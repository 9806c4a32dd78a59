use crate::error::Result;
use crate::status::{JobKind, JobRef};
use crate::store::EphemeralProgressStore;

/// Progress key layout for one job kind.
///
/// A job owns its base key `{namespace}:{id}` and any sub-key
/// `{namespace}:{id}:{field}`. Job ids never contain `:`, so `train:yolo`
/// does not own `train:yolo-v2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressKeyspace {
    namespace: &'static str,
}

impl ProgressKeyspace {
    pub fn for_kind(kind: JobKind) -> Self {
        Self {
            namespace: kind.namespace(),
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn key(&self, id: &str) -> String {
        format!("{}:{id}", self.namespace)
    }

    pub fn field_key(&self, id: &str, field: &str) -> String {
        format!("{}:{id}:{field}", self.namespace)
    }

    pub fn owns(&self, id: &str, key: &str) -> bool {
        let base = self.key(id);
        match key.strip_prefix(base.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(':'),
            None => false,
        }
    }

    /// Job id of a base key in this namespace; `None` for sub-keys and
    /// foreign keys.
    pub fn job_id<'a>(&self, key: &'a str) -> Option<&'a str> {
        let id = key.strip_prefix(self.namespace)?.strip_prefix(':')?;
        if id.is_empty() || id.contains(':') {
            None
        } else {
            Some(id)
        }
    }

    /// Deletes every key owned by `job`. Returns the number removed.
    pub async fn clear(&self, store: &dyn EphemeralProgressStore, job: &JobRef) -> Result<usize> {
        let keys: Vec<String> = store
            .scan_prefix(&self.key(&job.id))
            .await?
            .into_iter()
            .map(|(k, _)| k)
            .filter(|k| self.owns(&job.id, k))
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        store.delete(&keys).await
    }

    /// Base-key progress values of every job in this namespace.
    pub async fn entries(&self, store: &dyn EphemeralProgressStore) -> Result<Vec<(String, String)>> {
        let prefix = format!("{}:", self.namespace);
        Ok(store
            .scan_prefix(&prefix)
            .await?
            .into_iter()
            .filter_map(|(k, v)| self.job_id(&k).map(|id| (id.to_string(), v)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_stops_at_id_boundary() {
        let ks = ProgressKeyspace::for_kind(JobKind::MergeAndTrain);
        assert!(ks.owns("yolo", "train:yolo"));
        assert!(ks.owns("yolo", "train:yolo:epoch"));
        assert!(!ks.owns("yolo", "train:yolo-v2"));
        assert!(!ks.owns("yolo", "deploy:yolo"));
    }

    #[test]
    fn job_id_only_for_base_keys() {
        let ks = ProgressKeyspace::for_kind(JobKind::Deploy);
        assert_eq!(ks.job_id("deploy:m1"), Some("m1"));
        assert_eq!(ks.job_id("deploy:m1:step"), None);
        assert_eq!(ks.job_id("deployx:m1"), None);
        assert_eq!(ks.job_id("deploy:"), None);
    }
}
