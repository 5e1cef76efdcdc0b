//! SQLite-based persistence store

use crate::core::{Digest, ExecutionStatus, QualificationRecord, TestTier};
use crate::persistence::{ExecutionSummary, PersistenceBackend};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const SUMMARY_COLUMNS: &str = "id, target_name, status, revision, trigger, started_at, completed_at, \
     completed_stages, total_stages, exit_code, image_digest, error";

/// SQLite execution store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Open (or create) a store; `:memory:` gives a private in-memory database
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = if db_path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
        };
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("promote");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::open(&db_dir.join("executions.db")).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let path = path
            .to_str()
            .ok_or_else(|| anyhow!("database path {} is not valid UTF-8", path.display()))?;
        Self::new(path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                target_name TEXT NOT NULL,
                status TEXT NOT NULL,
                revision TEXT NOT NULL,
                trigger TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                completed_stages INTEGER NOT NULL DEFAULT 0,
                total_stages INTEGER NOT NULL DEFAULT 0,
                exit_code INTEGER NOT NULL DEFAULT 0,
                image_digest TEXT,
                error TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_target_name ON executions(target_name);
            CREATE INDEX IF NOT EXISTS idx_started_at ON executions(started_at);

            CREATE TABLE IF NOT EXISTS qualifications (
                digest TEXT NOT NULL,
                tier TEXT NOT NULL,
                revision TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (digest, tier, revision)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<ExecutionSummary> {
        Ok(ExecutionSummary {
            execution_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            target_name: row.get("target_name"),
            status: ExecutionStatus::parse(&row.get::<String, _>("status")),
            revision: row.get("revision"),
            trigger: row.get("trigger"),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            completed_stages: row.get::<i64, _>("completed_stages") as usize,
            total_stages: row.get::<i64, _>("total_stages") as usize,
            exit_code: row.get::<i64, _>("exit_code") as i32,
            image_digest: row.get("image_digest"),
            error: row.get("error"),
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteExecutionStore {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO executions
            (id, target_name, status, revision, trigger, started_at, completed_at,
             completed_stages, total_stages, exit_code, image_digest, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(execution.execution_id.to_string())
        .bind(&execution.target_name)
        .bind(execution.status.as_str())
        .bind(&execution.revision)
        .bind(&execution.trigger)
        .bind(Self::to_naive(execution.started_at))
        .bind(execution.completed_at.map(Self::to_naive))
        .bind(execution.completed_stages as i64)
        .bind(execution.total_stages as i64)
        .bind(execution.exit_code as i64)
        .bind(&execution.image_digest)
        .bind(&execution.error)
        .execute(&self.pool)
        .await
        .context("Failed to save execution")?;

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE id = ?1",
            SUMMARY_COLUMNS
        ))
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load execution")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_executions(&self, target_name: &str) -> Result<Vec<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE target_name = ?1 ORDER BY started_at DESC",
            SUMMARY_COLUMNS
        ))
        .bind(target_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_targets(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT target_name
            FROM executions
            ORDER BY target_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list targets")?;

        Ok(rows.iter().map(|row| row.get("target_name")).collect())
    }

    async fn record_qualification(&self, record: &QualificationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO qualifications (digest, tier, revision, recorded_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(record.digest.as_str())
        .bind(record.tier.name())
        .bind(&record.revision)
        .bind(Self::to_naive(record.recorded_at))
        .execute(&self.pool)
        .await
        .context("Failed to record qualification")?;

        Ok(())
    }

    async fn load_qualifications(&self) -> Result<Vec<QualificationRecord>> {
        let rows = sqlx::query(
            "SELECT digest, tier, revision, recorded_at FROM qualifications ORDER BY recorded_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load qualifications")?;

        rows.iter()
            .map(|row| {
                Ok(QualificationRecord {
                    digest: Digest::parse(&row.get::<String, _>("digest"))?,
                    tier: TestTier::from_str(&row.get::<String, _>("tier")).map_err(|e| anyhow!(e))?,
                    revision: row.get("revision"),
                    recorded_at: Self::from_naive(row.get("recorded_at")),
                })
            })
            .collect()
    }
}
