use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sastgate_core::error::{CoreError, Result};
use sastgate_core::{Finding, JobFilter, JobId, JobStore, ScanJob, StoredJob};
use sqlx::{Pool, Sqlite};

/// `JobStore` over SQLite. Records are kept as JSON next to the columns
/// used for filtering and ordering.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: Pool<Sqlite>,
}

impl SqliteJobStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

fn store_err(e: sqlx::Error) -> CoreError {
    CoreError::Store(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CoreError::Store(format!("encode failed: {}", e)))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| CoreError::Store(format!("corrupt record: {}", e)))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, job: &ScanJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_jobs (id, state, owner, project_name, created_at, record) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.state.as_str())
        .bind(job.owner.clone())
        .bind(job.project_name.clone())
        .bind(timestamp(&job.created_at))
        .bind(encode(job)?)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_job_state(&self, job: &ScanJob) -> Result<()> {
        let result = sqlx::query("UPDATE scan_jobs SET state = ?, record = ? WHERE id = ?")
            .bind(job.state.as_str())
            .bind(encode(job)?)
            .bind(job.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(job.id.to_string()));
        }
        Ok(())
    }

    async fn append_findings(&self, job_id: JobId, findings: &[Finding]) -> Result<()> {
        let id = job_id.to_string();
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT 1 FROM scan_jobs WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err)?;
        if exists.is_none() {
            return Err(CoreError::NotFound(id));
        }

        let next =
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(seq) + 1, 0) FROM findings WHERE job_id = ?")
                .bind(&id)
                .fetch_one(&mut *tx)
                .await
                .map_err(store_err)?;

        for (offset, finding) in findings.iter().enumerate() {
            sqlx::query(
                "INSERT INTO findings (id, job_id, seq, severity, file_path, record) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&finding.id)
            .bind(&id)
            .bind(next + offset as i64)
            .bind(finding.severity.as_str())
            .bind(&finding.file_path)
            .bind(encode(finding)?)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        tracing::debug!("Stored {} findings for job {}", findings.len(), job_id);
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<StoredJob>> {
        let id = job_id.to_string();
        let record =
            sqlx::query_scalar::<_, String>("SELECT record FROM scan_jobs WHERE id = ?")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        let Some(record) = record else {
            return Ok(None);
        };

        let rows =
            sqlx::query_scalar::<_, String>("SELECT record FROM findings WHERE job_id = ? ORDER BY seq")
                .bind(&id)
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;
        let findings = rows
            .iter()
            .map(|raw| decode::<Finding>(raw))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(StoredJob {
            job: decode(&record)?,
            findings,
        }))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ScanJob>> {
        // SQLite treats a negative LIMIT as no limit.
        let limit = filter.limit.map_or(-1, |l| l as i64);
        let offset = filter.offset as i64;
        let state = filter.state.map(|s| s.as_str());
        let project = filter.project_name.as_deref();

        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT record FROM scan_jobs
            WHERE (? IS NULL OR state = ?)
              AND (? IS NULL OR instr(lower(project_name), lower(?)) > 0)
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(state)
        .bind(state)
        .bind(project)
        .bind(project)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(|raw| decode(raw)).collect()
    }

    async fn delete_job(&self, job_id: JobId) -> Result<bool> {
        let id = job_id.to_string();
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query("DELETE FROM findings WHERE job_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let result = sqlx::query("DELETE FROM scan_jobs WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_report_download(&self, job_id: JobId, at: DateTime<Utc>) -> Result<()> {
        // single statement, so concurrent downloads cannot overwrite each other
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET record = json_set(
                record,
                '$.report_downloads', COALESCE(json_extract(record, '$.report_downloads'), 0) + 1,
                '$.last_report_at', ?
            )
            WHERE id = ?
            "#,
        )
        .bind(timestamp(&at))
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(job_id.to_string()));
        }
        Ok(())
    }
}
