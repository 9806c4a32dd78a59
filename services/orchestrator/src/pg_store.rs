//! Postgres adapters for the job status stores.

use async_trait::async_trait;
use jobstate::{DurableStatusStore, EphemeralProgressStore, JobKind, JobRef, JobStatus, StoreError};
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableStatusStore for PgStatusStore {
    async fn get_status(&self, job: &JobRef) -> jobstate::Result<Option<JobStatus>> {
        let raw: Option<String> = sqlx::query_scalar(r#"SELECT status FROM job_status WHERE kind = $1 AND job_id = $2"#)
            .bind(job.kind.as_str())
            .bind(&job.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        raw.map(|s| s.parse()).transpose()
    }

    async fn set_status(&self, job: &JobRef, status: JobStatus) -> jobstate::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_status (kind, job_id, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (kind, job_id) DO UPDATE
            SET status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(job.kind.as_str())
        .bind(&job.id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn list_statuses(&self, kind: JobKind) -> jobstate::Result<Vec<(String, JobStatus)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as(r#"SELECT job_id, status FROM job_status WHERE kind = $1 ORDER BY job_id"#)
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::backend)?;
        rows.into_iter()
            .map(|(id, status)| Ok((id, status.parse()?)))
            .collect()
    }
}

/// Progress rows live in an UNLOGGED table: fast, and lost on crash.
#[derive(Clone)]
pub struct PgProgressStore {
    pool: PgPool,
}

impl PgProgressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EphemeralProgressStore for PgProgressStore {
    async fn get(&self, key: &str) -> jobstate::Result<Option<String>> {
        sqlx::query_scalar(r#"SELECT value FROM job_progress WHERE key = $1"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)
    }

    async fn set(&self, key: &str, value: &str) -> jobstate::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_progress (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> jobstate::Result<Vec<(String, String)>> {
        sqlx::query_as(r#"SELECT key, value FROM job_progress WHERE starts_with(key, $1) ORDER BY key"#)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)
    }

    async fn delete(&self, keys: &[String]) -> jobstate::Result<usize> {
        let res = sqlx::query(r#"DELETE FROM job_progress WHERE key = ANY($1)"#)
            .bind(keys)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(res.rows_affected() as usize)
    }
}
