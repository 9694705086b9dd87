//! Storage abstraction for job status, tasks, runs, and results.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite). Every method is one
//! transaction: a caller never observes half of a status transition or
//! half of a result write.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::core::job::{JobStatus, JobType};
use crate::core::task::Task;
use crate::core::types::{DeviceId, JobId, Runtime, TaskId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is executing.
    Running,
    /// Run finished and every part succeeded.
    Completed,
    /// Run finished with at least one failure, or was aborted.
    Failed,
    /// Run was cut short by a process restart.
    Interrupted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Interrupted => "Interrupted",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StorageError> {
        match value {
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            "Interrupted" => Ok(Self::Interrupted),
            other => Err(StorageError::SerializationError(format!(
                "unknown run status: {}",
                other
            ))),
        }
    }
}

/// Stored status record of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub id: JobId,
    pub name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredJob {
    /// Create an idle job record.
    pub fn new(id: JobId, name: impl Into<String>, job_type: JobType) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            job_type,
            status: JobStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stored run of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    /// Run identifier.
    pub runtime: Runtime,
    /// Top-level run of the enclosing workflow, for child runs.
    pub parent_runtime: Option<Runtime>,
    pub job_id: JobId,
    pub job_name: String,
    /// Task that fired this run, if any.
    pub task_id: Option<TaskId>,
    pub status: RunStatus,
    pub success: Option<bool>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
}

impl StoredRun {
    /// Create a run in the Running state.
    pub fn new(runtime: Runtime, job_id: JobId, job_name: impl Into<String>) -> Self {
        Self {
            runtime,
            parent_runtime: None,
            job_id,
            job_name: job_name.into(),
            task_id: None,
            status: RunStatus::Running,
            success: None,
            started_at: Utc::now(),
            ended_at: None,
            duration: None,
            error: None,
        }
    }

    pub fn with_parent(mut self, parent_runtime: Option<Runtime>) -> Self {
        self.parent_runtime = parent_runtime;
        self
    }

    pub fn with_task(mut self, task_id: Option<TaskId>) -> Self {
        self.task_id = task_id;
        self
    }

    fn close(&mut self, status: RunStatus) {
        let ended = Utc::now();
        self.status = status;
        self.duration = (ended - self.started_at).to_std().ok();
        self.ended_at = Some(ended);
    }

    /// Mark the run as finished with the given overall outcome.
    pub fn mark_finished(&mut self, success: bool) {
        self.success = Some(success);
        self.close(if success {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        });
    }

    /// Mark the run as aborted by an error before completion.
    pub fn mark_aborted(&mut self, error: impl Into<String>) {
        self.success = Some(false);
        self.error = Some(error.into());
        self.close(RunStatus::Failed);
    }

    /// Mark the run as interrupted.
    pub fn mark_interrupted(&mut self) {
        self.close(RunStatus::Interrupted);
    }
}

/// Stored outcome of one job on one device (or globally) at one runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: Uuid,
    pub runtime: Runtime,
    pub parent_runtime: Option<Runtime>,
    pub job_id: JobId,
    pub job_name: String,
    /// `None` marks the job-level (global) result.
    pub device_id: Option<DeviceId>,
    pub device_name: Option<String>,
    pub success: bool,
    pub result: Value,
    pub created_at: DateTime<Utc>,
}

impl StoredResult {
    /// Create a global result.
    pub fn global(
        runtime: Runtime,
        job_id: JobId,
        job_name: impl Into<String>,
        success: bool,
        result: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            runtime,
            parent_runtime: None,
            job_id,
            job_name: job_name.into(),
            device_id: None,
            device_name: None,
            success,
            result,
            created_at: Utc::now(),
        }
    }

    /// Attach the result to a device.
    pub fn for_device(mut self, device_id: DeviceId, device_name: impl Into<String>) -> Self {
        self.device_id = Some(device_id);
        self.device_name = Some(device_name.into());
        self
    }

    pub fn with_parent(mut self, parent_runtime: Option<Runtime>) -> Self {
        self.parent_runtime = parent_runtime;
        self
    }

    pub fn is_global(&self) -> bool {
        self.device_id.is_none()
    }

    /// Key under which results are unique.
    pub fn key(&self) -> (JobId, Option<DeviceId>, Runtime) {
        (
            self.job_id.clone(),
            self.device_id.clone(),
            self.runtime.clone(),
        )
    }
}

/// Which device rows a result query matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Device and global rows.
    #[default]
    Any,
    /// Only per-device rows.
    AnyDevice,
    /// Only the global row.
    Global,
    /// Only the row of one device.
    Device(DeviceId),
}

/// Query over stored results. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub runtime: Option<Runtime>,
    pub parent_runtime: Option<Runtime>,
    pub job_id: Option<JobId>,
    pub device: DeviceFilter,
    pub success: Option<bool>,
}

impl ResultFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn parent_runtime(mut self, parent_runtime: Runtime) -> Self {
        self.parent_runtime = Some(parent_runtime);
        self
    }

    pub fn job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn device(mut self, device: DeviceFilter) -> Self {
        self.device = device;
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    /// Whether a stored result satisfies this filter.
    pub fn matches(&self, result: &StoredResult) -> bool {
        if self.runtime.as_ref().is_some_and(|rt| rt != &result.runtime) {
            return false;
        }
        if let Some(parent) = &self.parent_runtime {
            if result.parent_runtime.as_ref() != Some(parent) {
                return false;
            }
        }
        if self.job_id.as_ref().is_some_and(|id| id != &result.job_id) {
            return false;
        }
        if self.success.is_some_and(|s| s != result.success) {
            return false;
        }
        match &self.device {
            DeviceFilter::Any => true,
            DeviceFilter::AnyDevice => result.device_id.is_some(),
            DeviceFilter::Global => result.device_id.is_none(),
            DeviceFilter::Device(id) => result.device_id.as_ref() == Some(id),
        }
    }
}

/// Storage trait for persisting orchestrator state.
#[async_trait]
pub trait Storage: Send + Sync {
    // Job status operations

    /// Insert a job record, or refresh its name and type keeping its status.
    async fn save_job(&self, job: StoredJob) -> Result<(), StorageError>;

    /// Get a job record by ID.
    async fn get_job(&self, id: &JobId) -> Result<StoredJob, StorageError>;

    /// List all job records.
    async fn list_jobs(&self) -> Result<Vec<StoredJob>, StorageError>;

    /// Delete a job record by ID.
    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError>;

    /// Atomically move a job from Idle to Running.
    ///
    /// Returns `false`, changing nothing, if the job is already Running.
    async fn begin_job_run(&self, id: &JobId) -> Result<bool, StorageError>;

    /// Set a job's status.
    async fn set_job_status(&self, id: &JobId, status: JobStatus) -> Result<(), StorageError>;

    /// Set every job to Idle. Returns how many changed.
    async fn reset_job_statuses(&self) -> Result<usize, StorageError>;

    // Task operations

    /// Save a new task.
    async fn save_task(&self, task: Task) -> Result<(), StorageError>;

    async fn get_task(&self, id: &TaskId) -> Result<Task, StorageError>;

    async fn list_tasks(&self) -> Result<Vec<Task>, StorageError>;

    /// Replace an existing task.
    async fn update_task(&self, task: Task) -> Result<(), StorageError>;

    async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError>;

    // Run operations

    /// Save a new run.
    async fn save_run(&self, run: StoredRun) -> Result<(), StorageError>;

    /// Get a run by runtime.
    async fn get_run(&self, runtime: &Runtime) -> Result<StoredRun, StorageError>;

    /// List runs for a job, most recent first. Returns at most `limit` runs.
    async fn list_runs(&self, job_id: &JobId, limit: usize)
        -> Result<Vec<StoredRun>, StorageError>;

    /// List the child runs of a top-level run, oldest first.
    async fn list_child_runs(&self, parent: &Runtime) -> Result<Vec<StoredRun>, StorageError>;

    /// Replace an existing run.
    async fn update_run(&self, run: StoredRun) -> Result<(), StorageError>;

    /// Get all runs still marked Running.
    async fn get_incomplete_runs(&self) -> Result<Vec<StoredRun>, StorageError>;

    /// Mark a run as interrupted.
    async fn mark_run_interrupted(&self, runtime: &Runtime) -> Result<(), StorageError>;

    // Result operations

    /// Append a result. A second result for the same (job, device, runtime)
    /// is rejected.
    async fn save_result(&self, result: StoredResult) -> Result<(), StorageError>;

    /// List results matching a filter, ordered by runtime then device name.
    async fn list_results(&self, filter: &ResultFilter)
        -> Result<Vec<StoredResult>, StorageError>;

    /// Delete every result of a job. Returns how many were removed.
    async fn clear_results(&self, job_id: &JobId) -> Result<usize, StorageError>;
}
