use sastgate_core::{EngineConfig, JobManager};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::store::SqliteJobStore;

/// Process settings read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub database_url: String,
    pub config_path: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            bind: env::var("SASTGATE_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            database_url: env::var("SASTGATE_DATABASE")
                .unwrap_or_else(|_| "sqlite://sastgate_web.db".to_string()),
            config_path: env::var("SASTGATE_CONFIG").ok().map(PathBuf::from),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub manager: JobManager,
    pub db: Pool<Sqlite>,
}

impl AppState {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        // 引擎配置
        let config = EngineConfig::load(settings.config_path.as_deref())?;

        // 初始化数据库
        let db = init_db(&settings.database_url).await?;

        let store = Arc::new(SqliteJobStore::new(db.clone()));
        let manager = JobManager::new(config, store)?;
        Ok(Self { manager, db })
    }
}

pub async fn init_db(database_url: &str) -> anyhow::Result<Pool<Sqlite>> {
    tracing::info!("Database: {}", database_url);

    // 使用 SqliteConnectOptions 来确保数据库文件可以被创建
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    create_tables(&pool).await?;
    tracing::info!("Database initialized successfully");
    Ok(pool)
}

async fn create_tables(pool: &Pool<Sqlite>) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_jobs (
            id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            owner TEXT,
            project_name TEXT,
            created_at TEXT NOT NULL,
            record TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_scan_jobs_state ON scan_jobs(state);
        CREATE INDEX IF NOT EXISTS idx_scan_jobs_created ON scan_jobs(created_at);
        CREATE INDEX IF NOT EXISTS idx_scan_jobs_project ON scan_jobs(project_name);

        CREATE TABLE IF NOT EXISTS findings (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            severity TEXT NOT NULL,
            file_path TEXT NOT NULL,
            record TEXT NOT NULL,
            FOREIGN KEY(job_id) REFERENCES scan_jobs(id)
        );

        CREATE INDEX IF NOT EXISTS idx_findings_job ON findings(job_id, seq);
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| anyhow::anyhow!("Failed to create tables: {}", e))?;
    Ok(())
}

/// Single-connection in-memory database; the schema lives as long as the pool.
#[cfg(test)]
pub async fn init_memory_db() -> anyhow::Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_tables(&pool).await?;
    Ok(pool)
}
