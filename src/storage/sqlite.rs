//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::{
    DeviceFilter, ResultFilter, RunStatus, Storage, StorageError, StoredJob, StoredResult,
    StoredRun,
};
use crate::core::job::{JobStatus, JobType};
use crate::core::task::Task;
use crate::core::types::{DeviceId, JobId, Runtime, TaskId};

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

type JobRow = (String, String, String, String, String, String);

type RunRow = (
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    String,
    Option<bool>,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
);

type ResultRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
    bool,
    String,
    String,
);

const RUN_COLUMNS: &str = "runtime, parent_runtime, job_id, job_name, task_id, status, success, \
                           started_at, ended_at, duration_ms, error";

const RESULT_COLUMNS: &str = "id, runtime, parent_runtime, job_id, job_name, device_id, \
                              device_name, success, result, created_at";

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

pub(crate) fn time_to_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

pub(crate) fn string_to_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("bad timestamp '{}': {}", s, e)))
}

fn job_type_to_string(job_type: JobType) -> &'static str {
    match job_type {
        JobType::Service => "Service",
        JobType::Workflow => "Workflow",
    }
}

fn string_to_job_type(s: &str) -> Result<JobType, StorageError> {
    match s {
        "Service" => Ok(JobType::Service),
        "Workflow" => Ok(JobType::Workflow),
        other => Err(StorageError::SerializationError(format!(
            "unknown job type: {}",
            other
        ))),
    }
}

fn job_status_to_string(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Idle => "Idle",
        JobStatus::Running => "Running",
    }
}

fn string_to_job_status(s: &str) -> Result<JobStatus, StorageError> {
    match s {
        "Idle" => Ok(JobStatus::Idle),
        "Running" => Ok(JobStatus::Running),
        other => Err(StorageError::SerializationError(format!(
            "unknown job status: {}",
            other
        ))),
    }
}

fn row_to_job(row: JobRow) -> Result<StoredJob, StorageError> {
    Ok(StoredJob {
        id: JobId::new(row.0),
        name: row.1,
        job_type: string_to_job_type(&row.2)?,
        status: string_to_job_status(&row.3)?,
        created_at: string_to_time(&row.4)?,
        updated_at: string_to_time(&row.5)?,
    })
}

fn row_to_run(row: RunRow) -> Result<StoredRun, StorageError> {
    Ok(StoredRun {
        runtime: Runtime::new(row.0),
        parent_runtime: row.1.map(Runtime::new),
        job_id: JobId::new(row.2),
        job_name: row.3,
        task_id: row.4.map(TaskId::new),
        status: RunStatus::parse(&row.5)?,
        success: row.6,
        started_at: string_to_time(&row.7)?,
        ended_at: row.8.as_deref().map(string_to_time).transpose()?,
        duration: row.9.map(|ms| Duration::from_millis(ms.max(0) as u64)),
        error: row.10,
    })
}

fn row_to_result(row: ResultRow) -> Result<StoredResult, StorageError> {
    Ok(StoredResult {
        id: Uuid::parse_str(&row.0)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?,
        runtime: Runtime::new(row.1),
        parent_runtime: row.2.map(Runtime::new),
        job_id: JobId::new(row.3),
        job_name: row.4,
        device_id: row.5.map(DeviceId::new),
        device_name: row.6,
        success: row.7,
        result: serde_json::from_str(&row.8)?,
        created_at: string_to_time(&row.9)?,
    })
}

fn push_result_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ResultFilter) {
    if let Some(runtime) = &filter.runtime {
        builder
            .push(" AND runtime = ")
            .push_bind(runtime.as_str().to_string());
    }
    if let Some(parent) = &filter.parent_runtime {
        builder
            .push(" AND parent_runtime = ")
            .push_bind(parent.as_str().to_string());
    }
    if let Some(job_id) = &filter.job_id {
        builder
            .push(" AND job_id = ")
            .push_bind(job_id.as_str().to_string());
    }
    if let Some(success) = filter.success {
        builder.push(" AND success = ").push_bind(success);
    }
    match &filter.device {
        DeviceFilter::Any => {}
        DeviceFilter::AnyDevice => {
            builder.push(" AND device_id IS NOT NULL");
        }
        DeviceFilter::Global => {
            builder.push(" AND device_id IS NULL");
        }
        DeviceFilter::Device(id) => {
            builder
                .push(" AND device_id = ")
                .push_bind(id.as_str().to_string());
        }
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_job(&self, job: StoredJob) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, job_type, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                job_type = excluded.job_type,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.name)
        .bind(job_type_to_string(job.job_type))
        .bind(job_status_to_string(job.status))
        .bind(time_to_string(job.created_at))
        .bind(time_to_string(job.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<StoredJob, StorageError> {
        let row: JobRow = sqlx::query_as(
            "SELECT id, name, job_type, status, created_at, updated_at FROM jobs WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;

        row_to_job(row)
    }

    async fn list_jobs(&self) -> Result<Vec<StoredJob>, StorageError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT id, name, job_type, status, created_at, updated_at FROM jobs ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_job).collect()
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job: {}", id)));
        }
        Ok(())
    }

    async fn begin_job_run(&self, id: &JobId) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'Running', updated_at = ? WHERE id = ? AND status != 'Running'",
        )
        .bind(time_to_string(Utc::now()))
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Either missing or already running.
        self.get_job(id).await?;
        Ok(false)
    }

    async fn set_job_status(&self, id: &JobId, status: JobStatus) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE jobs SET status = ?, updated_at = ? WHERE id = ?")
            .bind(job_status_to_string(status))
            .bind(time_to_string(Utc::now()))
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job: {}", id)));
        }
        Ok(())
    }

    async fn reset_job_statuses(&self) -> Result<usize, StorageError> {
        let result =
            sqlx::query("UPDATE jobs SET status = 'Idle', updated_at = ? WHERE status != 'Idle'")
                .bind(time_to_string(Utc::now()))
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected() as usize)
    }

    async fn save_task(&self, task: Task) -> Result<(), StorageError> {
        let definition = serde_json::to_string(&task)?;
        let result = sqlx::query("INSERT INTO tasks (id, job_id, definition) VALUES (?, ?, ?)")
            .bind(task.id.as_str())
            .bind(task.job.as_str())
            .bind(definition)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("task: {}", task.id)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task, StorageError> {
        let row: (String,) = sqlx::query_as("SELECT definition FROM tasks WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))?;

        Ok(serde_json::from_str(&row.0)?)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT definition FROM tasks ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|row| serde_json::from_str(&row.0).map_err(StorageError::from))
            .collect()
    }

    async fn update_task(&self, task: Task) -> Result<(), StorageError> {
        let definition = serde_json::to_string(&task)?;
        let result = sqlx::query("UPDATE tasks SET job_id = ?, definition = ? WHERE id = ?")
            .bind(task.job.as_str())
            .bind(definition)
            .bind(task.id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task: {}", task.id)));
        }
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task: {}", id)));
        }
        Ok(())
    }

    async fn save_run(&self, run: StoredRun) -> Result<(), StorageError> {
        let result = sqlx::query(&format!(
            "INSERT INTO runs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            RUN_COLUMNS
        ))
        .bind(run.runtime.as_str())
        .bind(run.parent_runtime.as_ref().map(|r| r.as_str().to_string()))
        .bind(run.job_id.as_str())
        .bind(&run.job_name)
        .bind(run.task_id.as_ref().map(|t| t.as_str().to_string()))
        .bind(run.status.as_str())
        .bind(run.success)
        .bind(time_to_string(run.started_at))
        .bind(run.ended_at.map(time_to_string))
        .bind(run.duration.map(|d| d.as_millis() as i64))
        .bind(&run.error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("run: {}", run.runtime)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_run(&self, runtime: &Runtime) -> Result<StoredRun, StorageError> {
        let row: RunRow = sqlx::query_as(&format!(
            "SELECT {} FROM runs WHERE runtime = ?",
            RUN_COLUMNS
        ))
        .bind(runtime.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StorageError::NotFound(format!("run: {}", runtime)))?;

        row_to_run(row)
    }

    async fn list_runs(&self, job_id: &JobId, limit: usize) -> Result<Vec<StoredRun>, StorageError> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM runs WHERE job_id = ? ORDER BY runtime DESC LIMIT ?",
            RUN_COLUMNS
        ))
        .bind(job_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_run).collect()
    }

    async fn list_child_runs(&self, parent: &Runtime) -> Result<Vec<StoredRun>, StorageError> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM runs WHERE parent_runtime = ? ORDER BY runtime",
            RUN_COLUMNS
        ))
        .bind(parent.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_run).collect()
    }

    async fn update_run(&self, run: StoredRun) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE runs SET status = ?, success = ?, ended_at = ?, duration_ms = ?, error = ?
            WHERE runtime = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.success)
        .bind(run.ended_at.map(time_to_string))
        .bind(run.duration.map(|d| d.as_millis() as i64))
        .bind(&run.error)
        .bind(run.runtime.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("run: {}", run.runtime)));
        }
        Ok(())
    }

    async fn get_incomplete_runs(&self) -> Result<Vec<StoredRun>, StorageError> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM runs WHERE status = 'Running' ORDER BY runtime",
            RUN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_run).collect()
    }

    async fn mark_run_interrupted(&self, runtime: &Runtime) -> Result<(), StorageError> {
        let mut run = self.get_run(runtime).await?;
        run.mark_interrupted();
        self.update_run(run).await
    }

    async fn save_result(&self, result: StoredResult) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&result.result)?;
        let outcome = sqlx::query(&format!(
            "INSERT INTO results ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            RESULT_COLUMNS
        ))
        .bind(result.id.to_string())
        .bind(result.runtime.as_str())
        .bind(result.parent_runtime.as_ref().map(|r| r.as_str().to_string()))
        .bind(result.job_id.as_str())
        .bind(&result.job_name)
        .bind(result.device_id.as_ref().map(|d| d.as_str().to_string()))
        .bind(&result.device_name)
        .bind(result.success)
        .bind(payload)
        .bind(time_to_string(result.created_at))
        .execute(&self.pool)
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!(
                    "result: {}/{}/{}",
                    result.job_id,
                    result.device_name.as_deref().unwrap_or("global"),
                    result.runtime
                )))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn list_results(&self, filter: &ResultFilter) -> Result<Vec<StoredResult>, StorageError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM results WHERE 1 = 1", RESULT_COLUMNS));
        push_result_filter(&mut builder, filter);
        builder.push(" ORDER BY runtime, device_name");

        let rows: Vec<ResultRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(row_to_result).collect()
    }

    async fn clear_results(&self, job_id: &JobId) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM results WHERE job_id = ?")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() as usize)
    }
}
