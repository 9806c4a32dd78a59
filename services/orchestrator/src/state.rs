use std::sync::Arc;

use jobstate::JobStatusTracker;

use crate::broker::JobQueue;
use crate::config::AppConfig;
use crate::repository::{ArchiveRepository, InferenceRepository, ModelRepository};
use crate::task_orchestrator::TaskOrchestrator;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: AppConfig,
    pub tracker: JobStatusTracker,
    pub queue: JobQueue,
    pub archives: Arc<dyn ArchiveRepository>,
    pub models: Arc<dyn ModelRepository>,
    pub inferences: Arc<dyn InferenceRepository>,
    pub orchestrator: TaskOrchestrator,
}
