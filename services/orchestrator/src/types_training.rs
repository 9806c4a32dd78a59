use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub map50: f64,
    pub map50_95: f64,
    pub precision: f64,
    pub recall: f64,
}

#[derive(Debug, Clone)]
pub struct TrainingRequest {
    pub model_name: String,
    pub model_ext: String,
    pub version: i32,
    pub base_model: String,
    pub data_yaml: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifact_path: PathBuf,
    pub metrics: TrainingMetrics,
}

/// One NDJSON line on the trainer's stdout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum TrainingEvent {
    #[serde(rename = "progress")]
    Progress { epoch: u32, epochs: u32 },

    #[serde(rename = "done")]
    Done {
        model_path: String,
        map50: f64,
        map50_95: f64,
        precision: f64,
        recall: f64,
    },

    #[serde(rename = "error")]
    Error { message: String },
}
