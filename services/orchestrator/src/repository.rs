//! Persistence for stage artifacts: uploaded archives, trained models and
//! rendered inference files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types_jobs::MediaKind;
use crate::types_training::TrainingMetrics;

#[derive(Debug, Clone, Serialize)]
pub struct DatasetRecord {
    pub id: Uuid,
    pub name: String,
    pub file_path: PathBuf,
    pub size_bytes: i64,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRecord {
    pub name: String,
    pub version: i32,
    pub file_path: PathBuf,
    pub classes: Vec<String>,
    pub metrics: TrainingMetrics,
    /// Where the model server picked the artifact up; `None` while undeployed.
    pub served_path: Option<PathBuf>,
}

/// An uploaded inference source. `model_name` and `output_path` are set once
/// a render has finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRecord {
    pub request_id: Uuid,
    pub file_name: String,
    pub media: MediaKind,
    pub source_path: PathBuf,
    pub size_bytes: i64,
    pub model_name: Option<String>,
    pub output_path: Option<PathBuf>,
}

#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    async fn register(&self, record: &DatasetRecord) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<DatasetRecord>>;
    /// Newest first.
    async fn list(&self) -> Result<Vec<(DatasetRecord, DateTime<Utc>)>>;
    /// Removes the row and returns it so the caller can drop the file.
    async fn delete(&self, id: Uuid) -> Result<Option<DatasetRecord>>;
}

#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn latest_version(&self, name: &str) -> Result<Option<i32>>;
    async fn register(&self, record: &ModelRecord) -> Result<()>;
    /// Exact version, or the latest one when `version` is `None`.
    async fn find(&self, name: &str, version: Option<i32>) -> Result<Option<ModelRecord>>;
    async fn deployed(&self, name: &str) -> Result<Option<ModelRecord>>;
    async fn set_served(&self, name: &str, version: i32, served_path: &Path) -> Result<()>;
    /// Marks every version of `name` as not served.
    async fn clear_served(&self, name: &str) -> Result<()>;
    /// Every registered version, ordered by name then version.
    async fn list(&self) -> Result<Vec<ModelRecord>>;
    /// Drops every version of `name`; returns how many were removed.
    async fn delete(&self, name: &str) -> Result<u64>;
}

#[async_trait]
pub trait InferenceRepository: Send + Sync {
    async fn register(&self, record: &InferenceRecord) -> Result<()>;
    async fn get(&self, request_id: Uuid) -> Result<Option<InferenceRecord>>;
    async fn record_output(&self, request_id: Uuid, model_name: &str, output_path: &Path) -> Result<()>;
    /// Newest first.
    async fn list(&self) -> Result<Vec<InferenceRecord>>;
    async fn delete(&self, request_id: Uuid) -> Result<Option<InferenceRecord>>;
}

/// Next version for a model whose latest registered version is `latest`.
pub fn next_version(latest: Option<i32>) -> i32 {
    latest.map_or(1, |v| v + 1)
}

#[derive(Clone)]
pub struct PgArchiveRepository {
    pool: PgPool,
}

impl PgArchiveRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

}

#[derive(sqlx::FromRow)]
struct DatasetRow {
    id: Uuid,
    name: String,
    file_path: String,
    size_bytes: i64,
    content_hash: String,
    created_at: DateTime<Utc>,
}

impl DatasetRow {
    fn listed(self) -> (DatasetRecord, DateTime<Utc>) {
        let created_at = self.created_at;
        (self.record(), created_at)
    }

    fn record(self) -> DatasetRecord {
        DatasetRecord {
            id: self.id,
            name: self.name,
            file_path: PathBuf::from(self.file_path),
            size_bytes: self.size_bytes,
            content_hash: self.content_hash,
        }
    }
}

#[async_trait]
impl ArchiveRepository for PgArchiveRepository {
    async fn register(&self, record: &DatasetRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO datasets (id, name, file_path, size_bytes, content_hash)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.file_path.to_string_lossy().as_ref())
        .bind(record.size_bytes)
        .bind(&record.content_hash)
        .execute(&self.pool)
        .await
        .context("insert dataset")?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DatasetRecord>> {
        let row: Option<DatasetRow> = sqlx::query_as(
            r#"
            SELECT id, name, file_path, size_bytes, content_hash, created_at
            FROM datasets
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("select dataset")?;
        Ok(row.map(DatasetRow::record))
    }

    async fn list(&self) -> Result<Vec<(DatasetRecord, DateTime<Utc>)>> {
        let rows: Vec<DatasetRow> = sqlx::query_as(
            r#"
            SELECT id, name, file_path, size_bytes, content_hash, created_at
            FROM datasets
            ORDER BY created_at DESC
            LIMIT 100
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("list datasets")?;
        Ok(rows.into_iter().map(DatasetRow::listed).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<Option<DatasetRecord>> {
        let row: Option<DatasetRow> = sqlx::query_as(
            r#"
            DELETE FROM datasets
            WHERE id = $1
            RETURNING id, name, file_path, size_bytes, content_hash, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("delete dataset")?;
        Ok(row.map(DatasetRow::record))
    }
}

#[derive(Clone)]
pub struct PgModelRepository {
    pool: PgPool,
}

impl PgModelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ModelRow {
    name: String,
    version: i32,
    file_path: String,
    classes: Json<Vec<String>>,
    map50: f64,
    map50_95: f64,
    precision: f64,
    recall: f64,
    served_path: Option<String>,
}

impl From<ModelRow> for ModelRecord {
    fn from(r: ModelRow) -> Self {
        ModelRecord {
            name: r.name,
            version: r.version,
            file_path: PathBuf::from(r.file_path),
            classes: r.classes.0,
            metrics: TrainingMetrics {
                map50: r.map50,
                map50_95: r.map50_95,
                precision: r.precision,
                recall: r.recall,
            },
            served_path: r.served_path.map(PathBuf::from),
        }
    }
}

const MODEL_COLUMNS: &str = "name, version, file_path, classes, map50, map50_95, precision, recall, served_path";

#[async_trait]
impl ModelRepository for PgModelRepository {
    async fn latest_version(&self, name: &str) -> Result<Option<i32>> {
        let v: Option<i32> = sqlx::query_scalar(r#"SELECT MAX(version) FROM models WHERE name = $1"#)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .context("select latest model version")?;
        Ok(v)
    }

    async fn register(&self, record: &ModelRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO models (name, version, file_path, classes, map50, map50_95, precision, recall)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name, version) DO UPDATE
            SET file_path = EXCLUDED.file_path,
                classes = EXCLUDED.classes,
                map50 = EXCLUDED.map50,
                map50_95 = EXCLUDED.map50_95,
                precision = EXCLUDED.precision,
                recall = EXCLUDED.recall
            "#,
        )
        .bind(&record.name)
        .bind(record.version)
        .bind(record.file_path.to_string_lossy().as_ref())
        .bind(Json(&record.classes))
        .bind(record.metrics.map50)
        .bind(record.metrics.map50_95)
        .bind(record.metrics.precision)
        .bind(record.metrics.recall)
        .execute(&self.pool)
        .await
        .context("insert model")?;
        Ok(())
    }

    async fn find(&self, name: &str, version: Option<i32>) -> Result<Option<ModelRecord>> {
        let row: Option<ModelRow> = match version {
            Some(v) => {
                sqlx::query_as(&format!("SELECT {MODEL_COLUMNS} FROM models WHERE name = $1 AND version = $2"))
                    .bind(name)
                    .bind(v)
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {MODEL_COLUMNS} FROM models WHERE name = $1 ORDER BY version DESC LIMIT 1"
                ))
                .bind(name)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .context("select model")?;
        Ok(row.map(ModelRecord::from))
    }

    async fn deployed(&self, name: &str) -> Result<Option<ModelRecord>> {
        let row: Option<ModelRow> = sqlx::query_as(&format!(
            "SELECT {MODEL_COLUMNS} FROM models WHERE name = $1 AND served_path IS NOT NULL ORDER BY version DESC LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("select deployed model")?;
        Ok(row.map(ModelRecord::from))
    }

    async fn set_served(&self, name: &str, version: i32, served_path: &Path) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(r#"UPDATE models SET served_path = NULL WHERE name = $1"#)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"UPDATE models SET served_path = $3 WHERE name = $1 AND version = $2"#)
            .bind(name)
            .bind(version)
            .bind(served_path.to_string_lossy().as_ref())
            .execute(&mut *tx)
            .await?;
        tx.commit().await.context("mark model served")?;
        Ok(())
    }

    async fn clear_served(&self, name: &str) -> Result<()> {
        sqlx::query(r#"UPDATE models SET served_path = NULL WHERE name = $1"#)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("clear served model")?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ModelRecord>> {
        let rows: Vec<ModelRow> = sqlx::query_as(&format!("SELECT {MODEL_COLUMNS} FROM models ORDER BY name, version"))
            .fetch_all(&self.pool)
            .await
            .context("list models")?;
        Ok(rows.into_iter().map(ModelRecord::from).collect())
    }

    async fn delete(&self, name: &str) -> Result<u64> {
        let res = sqlx::query(r#"DELETE FROM models WHERE name = $1"#)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("delete model")?;
        Ok(res.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgInferenceRepository {
    pool: PgPool,
}

impl PgInferenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct InferenceRow {
    request_id: Uuid,
    file_name: String,
    media: String,
    source_path: String,
    size_bytes: i64,
    model_name: Option<String>,
    output_path: Option<String>,
}

impl TryFrom<InferenceRow> for InferenceRecord {
    type Error = anyhow::Error;

    fn try_from(r: InferenceRow) -> Result<Self> {
        Ok(InferenceRecord {
            request_id: r.request_id,
            file_name: r.file_name,
            media: r.media.parse()?,
            source_path: PathBuf::from(r.source_path),
            size_bytes: r.size_bytes,
            model_name: r.model_name,
            output_path: r.output_path.map(PathBuf::from),
        })
    }
}

const INFERENCE_COLUMNS: &str = "request_id, file_name, media, source_path, size_bytes, model_name, output_path";

#[async_trait]
impl InferenceRepository for PgInferenceRepository {
    async fn register(&self, record: &InferenceRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inferences (request_id, file_name, media, source_path, size_bytes)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.request_id)
        .bind(&record.file_name)
        .bind(record.media.as_str())
        .bind(record.source_path.to_string_lossy().as_ref())
        .bind(record.size_bytes)
        .execute(&self.pool)
        .await
        .context("insert inference upload")?;
        Ok(())
    }

    async fn get(&self, request_id: Uuid) -> Result<Option<InferenceRecord>> {
        let row: Option<InferenceRow> =
            sqlx::query_as(&format!("SELECT {INFERENCE_COLUMNS} FROM inferences WHERE request_id = $1"))
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await
                .context("select inference")?;
        row.map(InferenceRecord::try_from).transpose()
    }

    async fn record_output(&self, request_id: Uuid, model_name: &str, output_path: &Path) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE inferences
            SET model_name = $2, output_path = $3, rendered_at = NOW()
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(model_name)
        .bind(output_path.to_string_lossy().as_ref())
        .execute(&self.pool)
        .await
        .context("record inference output")?;
        if res.rows_affected() == 0 {
            anyhow::bail!("inference {request_id} was deleted while rendering");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<InferenceRecord>> {
        let rows: Vec<InferenceRow> = sqlx::query_as(&format!(
            "SELECT {INFERENCE_COLUMNS} FROM inferences ORDER BY created_at DESC LIMIT 100"
        ))
        .fetch_all(&self.pool)
        .await
        .context("list inferences")?;
        rows.into_iter().map(InferenceRecord::try_from).collect()
    }

    async fn delete(&self, request_id: Uuid) -> Result<Option<InferenceRecord>> {
        let row: Option<InferenceRow> = sqlx::query_as(&format!(
            "DELETE FROM inferences WHERE request_id = $1 RETURNING {INFERENCE_COLUMNS}"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .context("delete inference")?;
        row.map(InferenceRecord::try_from).transpose()
    }
}
