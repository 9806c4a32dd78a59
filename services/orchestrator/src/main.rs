mod broker;
mod config;
mod inference;
mod model_server;
mod pg_store;
mod repository;
mod routes_datasets;
mod routes_inference;
mod routes_jobs;
mod routes_models;
mod state;
mod task_orchestrator;
mod trainer;
mod types_jobs;
mod types_training;
mod uploads;
mod worker_loop;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use jobstate::JobStatusTracker;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::broker::JobQueue;
use crate::config::AppConfig;
use crate::inference::SubprocessRenderer;
use crate::model_server::TritonModelServer;
use crate::pg_store::{PgProgressStore, PgStatusStore};
use crate::repository::{
    ArchiveRepository, InferenceRepository, ModelRepository, PgArchiveRepository, PgInferenceRepository,
    PgModelRepository,
};
use crate::state::AppState;
use crate::task_orchestrator::{Collaborators, TaskOrchestrator, WorkDirs};
use crate::trainer::SubprocessTrainer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    // --- Postgres ---
    let pg_pool = PgPool::connect(&cfg.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run migrations")?;

    check_postgres(&pg_pool).await?;
    info!("postgres: ok");

    let triton = Arc::new(TritonModelServer::new(cfg.triton_url.clone(), cfg.triton_model_repo.clone()));
    // Validation and training work without a model server, so this only warns.
    match triton.ping().await {
        Ok(()) => info!(url = %cfg.triton_url, "triton: ok"),
        Err(e) => warn!(url = %cfg.triton_url, error = ?e, "triton: unreachable"),
    }

    let tracker = JobStatusTracker::new(
        Arc::new(PgStatusStore::new(pg_pool.clone())),
        Arc::new(PgProgressStore::new(pg_pool.clone())),
    );

    let archives: Arc<dyn ArchiveRepository> = Arc::new(PgArchiveRepository::new(pg_pool.clone()));
    let models: Arc<dyn ModelRepository> = Arc::new(PgModelRepository::new(pg_pool.clone()));
    let inferences: Arc<dyn InferenceRepository> = Arc::new(PgInferenceRepository::new(pg_pool.clone()));

    let collaborators = Collaborators {
        archives: archives.clone(),
        models: models.clone(),
        inferences: inferences.clone(),
        trainer: Arc::new(SubprocessTrainer {
            python: cfg.trainer_python.clone(),
            script: cfg.trainer_script.clone(),
            epochs: cfg.train_epochs,
            imgsz: cfg.train_imgsz,
            model_dir: cfg.model_dir.clone(),
        }),
        server: triton,
        renderer: Arc::new(SubprocessRenderer {
            python: cfg.trainer_python.clone(),
            script: cfg.render_script.clone(),
            server_url: cfg.triton_url.clone(),
        }),
    };
    let orchestrator = TaskOrchestrator::new(
        tracker.clone(),
        collaborators,
        WorkDirs {
            merged: cfg.work_dir.join("merged"),
            inference: cfg.inference_dir.clone(),
        },
    );

    let app_state = Arc::new(AppState {
        config: cfg.clone(),
        tracker,
        queue: JobQueue::new(pg_pool),
        archives,
        models,
        inferences,
        orchestrator,
    });

    let cancel = CancellationToken::new();
    let workers = tokio::spawn(crate::worker_loop::run_worker_pool(app_state.clone(), cancel.clone()));

    let app = Router::new()
        .route("/datasets", post(crate::routes_datasets::post_dataset))
        .route("/datasets", get(crate::routes_datasets::get_datasets))
        .route("/datasets/:id", delete(crate::routes_datasets::delete_dataset))
        .route("/models", get(crate::routes_models::get_models))
        .route("/models/:name", delete(crate::routes_models::delete_model))
        .route("/inferences", post(crate::routes_inference::post_inference))
        .route("/inferences", get(crate::routes_inference::get_inferences))
        .route("/inferences/:id", delete(crate::routes_inference::delete_inference))
        .route("/inferences/:id/download", get(crate::routes_inference::download_inference))
        .route("/jobs", post(crate::routes_jobs::post_job))
        .route("/jobs/:kind", get(crate::routes_jobs::get_jobs))
        .route("/jobs/:kind/:id", get(crate::routes_jobs::get_job))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = &cfg.bind_addr;
    info!("orchestrator listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl_c listener failed");
            }
            info!("shutdown requested");
            shutdown.cancel();
        })
        .await
        .context("HTTP server failed")?;

    cancel.cancel();
    workers.await.context("worker pool panicked")?;
    Ok(())
}

async fn check_postgres(pg_pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pg_pool)
        .await
        .context("Postgres ping failed")?;
    Ok(())
}
