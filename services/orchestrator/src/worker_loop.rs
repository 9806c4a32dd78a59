use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::{JobQueue, HEARTBEAT_EVERY};
use crate::state::SharedState;
use crate::task_orchestrator::StageOutcome;

pub fn worker_prefix() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "orchestrator".to_string())
}

/// Runs `WORKER_COUNT` workers until `cancel` fires. Each worker finishes
/// its current stage before stopping.
pub async fn run_worker_pool(state: SharedState, cancel: CancellationToken) {
    let prefix = worker_prefix();
    if let Err(e) = state.queue.recover(&prefix).await {
        warn!(error = ?e, "worker_pool: claim recovery failed");
    }

    let mut workers = Vec::with_capacity(state.config.worker_count);
    for n in 0..state.config.worker_count {
        let worker_id = format!("{prefix}-{n}");
        workers.push(tokio::spawn(run_worker(state.clone(), worker_id, cancel.clone())));
    }
    for w in workers {
        if let Err(e) = w.await {
            error!(error = %e, "worker task ended abnormally");
        }
    }
    info!("worker_pool: stopped");
}

async fn run_worker(state: SharedState, worker_id: String, cancel: CancellationToken) {
    info!(worker_id = %worker_id, "worker: started");
    let poll = state.config.poll_interval;

    while !cancel.is_cancelled() {
        match state.queue.claim(&worker_id).await {
            Ok(Some(message)) => {
                info!(worker_id = %worker_id, message_id = %message.id, kind = %message.payload.kind(), "worker: starting job");
                let stop_heartbeat = CancellationToken::new();
                let heartbeat = spawn_heartbeat(
                    stop_heartbeat.clone(),
                    HEARTBEAT_EVERY,
                    lease_keeper(state.queue.clone(), message.id, worker_id.clone()),
                );
                let outcome = state.orchestrator.run(&message).await;
                stop_heartbeat.cancel();
                if let Err(e) = heartbeat.await {
                    warn!(worker_id = %worker_id, message_id = %message.id, error = %e, "heartbeat task ended abnormally");
                }

                let settled = match outcome {
                    StageOutcome::NotStarted => state.queue.release(message.id, &worker_id).await,
                    StageOutcome::Completed | StageOutcome::Failed => state.queue.ack(message.id).await,
                };
                if let Err(e) = settled {
                    warn!(worker_id = %worker_id, message_id = %message.id, error = ?e, "worker: could not settle message");
                }
                if outcome == StageOutcome::NotStarted {
                    idle(&cancel, poll).await;
                }
            }
            Ok(None) => idle(&cancel, poll).await,
            Err(e) => {
                warn!(worker_id = %worker_id, error = ?e, "worker: claim failed");
                idle(&cancel, poll).await;
            }
        }
    }
    info!(worker_id = %worker_id, "worker: stopped");
}

/// Calls `beat` every `every` until `cancel` fires or `beat` returns false.
fn spawn_heartbeat<B, F>(cancel: CancellationToken, every: Duration, mut beat: B) -> JoinHandle<()>
where
    B: FnMut() -> F + Send + 'static,
    F: Future<Output = bool> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(every) => {
                    if !beat().await {
                        break;
                    }
                }
            }
        }
    })
}

type BeatFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Lease renewal for one claimed message. Stops once the claim is lost;
/// transient errors keep it going until the lease itself runs out.
fn lease_keeper(queue: JobQueue, message_id: Uuid, worker_id: String) -> impl FnMut() -> BeatFuture + Send + 'static {
    move || -> BeatFuture {
        let queue = queue.clone();
        let worker_id = worker_id.clone();
        Box::pin(async move {
            match queue.heartbeat(message_id, &worker_id).await {
                Ok(true) => true,
                Ok(false) => {
                    warn!(worker_id = %worker_id, message_id = %message_id, "lease lost; message may be redelivered");
                    false
                }
                Err(e) => {
                    warn!(worker_id = %worker_id, message_id = %message_id, error = ?e, "heartbeat failed");
                    true
                }
            }
        })
    }
}

async fn idle(cancel: &CancellationToken, poll: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = sleep(poll) => {}
    }
}
