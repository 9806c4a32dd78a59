use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,

    pub dataset_dir: PathBuf,
    pub work_dir: PathBuf,
    pub model_dir: PathBuf,
    pub inference_dir: PathBuf,

    pub trainer_python: String,
    pub trainer_script: PathBuf,
    pub render_script: PathBuf,
    pub train_epochs: u32,
    pub train_imgsz: u32,

    pub triton_url: String,
    pub triton_model_repo: PathBuf,

    pub worker_count: usize,
    pub poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = get("DATABASE_URL")?;
        let bind_addr = get_or("ORCH_BIND_ADDR", "0.0.0.0:8080");

        let triton_url = get_or("TRITON_URL", "http://triton:8000");
        let worker_count: usize = parse_or("WORKER_COUNT", 2)?;
        let poll_secs: u64 = parse_or("POLL_INTERVAL_SECS", 5)?;

        // Tiny sanity checks (fail fast, fail loud)
        if !triton_url.starts_with("http://") && !triton_url.starts_with("https://") {
            bail!("TRITON_URL must start with http:// or https://");
        }
        if worker_count == 0 {
            bail!("WORKER_COUNT must be at least 1");
        }
        if poll_secs == 0 {
            bail!("POLL_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            database_url,
            bind_addr,
            dataset_dir: get_or("DATASET_DIR", "data/datasets").into(),
            work_dir: get_or("WORK_DIR", "data/work").into(),
            model_dir: get_or("MODEL_DIR", "data/models").into(),
            inference_dir: get_or("INFERENCE_DIR", "data/inference").into(),
            trainer_python: get_or("TRAINER_PYTHON", "python3"),
            trainer_script: get_or("TRAINER_SCRIPT", "workers/yolo_trainer.py").into(),
            render_script: get_or("RENDER_SCRIPT", "workers/render_inference.py").into(),
            train_epochs: parse_or("TRAIN_EPOCHS", 100)?,
            train_imgsz: parse_or("TRAIN_IMGSZ", 640)?,
            triton_url,
            triton_model_repo: get_or("TRITON_MODEL_REPO", "data/triton_repo").into(),
            worker_count,
            poll_interval: Duration::from_secs(poll_secs),
        })
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn get_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{key}={raw:?} is not valid: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_are_trimmed_and_checked() {
        assert_eq!(parse_value::<u32>("TRAIN_EPOCHS", " 50 ").unwrap(), 50);
        let err = parse_value::<usize>("WORKER_COUNT", "two").unwrap_err();
        assert!(err.to_string().contains("WORKER_COUNT"));
    }
}
