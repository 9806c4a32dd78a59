//! Postgres-backed job queue. Delivery is at-least-once: a message stays in
//! the table until a worker acks it, and a claim whose lease runs out without
//! a heartbeat is handed to the next worker that asks.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::types_jobs::{JobMessage, JobPayload};

pub const LEASE_SECS: i64 = 30;
pub const HEARTBEAT_EVERY: Duration = Duration::from_secs(10);

/// Where submissions go.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn enqueue(&self, payload: JobPayload) -> Result<JobMessage>;
}

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    payload: JsonValue,
    attempts: i32,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, payload: JobPayload) -> Result<JobMessage> {
        let message = JobMessage {
            id: Uuid::new_v4(),
            payload,
        };
        let body = serde_json::to_value(&message.payload)?;

        sqlx::query(r#"INSERT INTO job_queue (id, kind, payload) VALUES ($1, $2, $3)"#)
            .bind(message.id)
            .bind(message.payload.kind().as_str())
            .bind(body)
            .execute(&self.pool)
            .await
            .context("Failed to enqueue job")?;

        debug!(message_id = %message.id, kind = %message.payload.kind(), "job enqueued");
        Ok(message)
    }

    /// Claims the oldest message that is unclaimed or whose lease expired.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<JobMessage>> {
        let mut tx: Transaction<Postgres> = self.pool.begin().await?;

        let row: Option<QueueRow> = sqlx::query_as(
            r#"
            SELECT id, payload, attempts
            FROM job_queue
            WHERE claimed_by IS NULL
               OR lease_until IS NULL
               OR lease_until < NOW()
            ORDER BY enqueued_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(r) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let payload: JobPayload = match serde_json::from_value(r.payload) {
            Ok(p) => p,
            Err(e) => {
                error!(message_id = %r.id, error = %e, "dropping undecodable job message");
                sqlx::query(r#"DELETE FROM job_queue WHERE id = $1"#)
                    .bind(r.id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Ok(None);
            }
        };

        sqlx::query(
            r#"
            UPDATE job_queue
            SET claimed_by = $2,
                claimed_at = NOW(),
                lease_until = NOW() + ($3 * INTERVAL '1 second'),
                attempts = attempts + 1
            WHERE id = $1
            "#,
        )
        .bind(r.id)
        .bind(worker_id)
        .bind(LEASE_SECS)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(message_id = %r.id, worker_id, attempts = r.attempts + 1, "job claimed");
        Ok(Some(JobMessage { id: r.id, payload }))
    }

    /// Extends the lease while `worker_id` still holds the claim. Returns
    /// false once the claim has passed to another worker.
    pub async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE job_queue
            SET lease_until = NOW() + ($3 * INTERVAL '1 second')
            WHERE id = $1
              AND claimed_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(LEASE_SECS)
        .execute(&self.pool)
        .await
        .context("Failed to extend job lease")?;
        Ok(res.rows_affected() == 1)
    }

    /// Hands a claimed message back for redelivery.
    pub async fn release(&self, id: Uuid, worker_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET claimed_by = NULL, claimed_at = NULL, lease_until = NULL
            WHERE id = $1
              AND claimed_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .context("Failed to release job")?;
        Ok(())
    }

    /// Deletes the message. A worker whose lease was taken over still acks:
    /// the stage ran to a terminal status either way.
    pub async fn ack(&self, id: Uuid) -> Result<()> {
        let res = sqlx::query(r#"DELETE FROM job_queue WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to ack job")?;
        if res.rows_affected() == 0 {
            warn!(message_id = %id, "ack found no message; already acked by another worker");
        }
        Ok(())
    }

    /// Releases claims left behind by a previous run of the workers named
    /// `{worker_prefix}-N` without waiting for their leases to run out.
    pub async fn recover(&self, worker_prefix: &str) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE job_queue
            SET claimed_by = NULL, claimed_at = NULL, lease_until = NULL
            WHERE starts_with(claimed_by, $1 || '-')
            "#,
        )
        .bind(worker_prefix)
        .execute(&self.pool)
        .await
        .context("Failed to recover claimed jobs")?;

        if res.rows_affected() > 0 {
            info!(worker_prefix, released = res.rows_affected(), "released stale job claims");
        }
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl JobSink for JobQueue {
    async fn enqueue(&self, payload: JobPayload) -> Result<JobMessage> {
        self.insert(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_renews_well_inside_the_lease() {
        assert!(HEARTBEAT_EVERY.as_secs() as i64 * 2 < LEASE_SECS);
    }
}
