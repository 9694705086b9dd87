//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{
    ResultFilter, RunStatus, Storage, StorageError, StoredJob, StoredResult, StoredRun,
};
use crate::core::job::JobStatus;
use crate::core::task::Task;
use crate::core::types::{JobId, Runtime, TaskId};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    jobs: RwLock<HashMap<JobId, StoredJob>>,
    tasks: RwLock<HashMap<TaskId, Task>>,
    runs: RwLock<HashMap<Runtime, StoredRun>>,
    results: RwLock<Vec<StoredResult>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            results: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_job(&self, job: StoredJob) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                existing.name = job.name;
                existing.job_type = job.job_type;
                existing.updated_at = Utc::now();
            }
            None => {
                jobs.insert(job.id.clone(), job);
            }
        }
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<StoredJob, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))
    }

    async fn list_jobs(&self) -> Result<Vec<StoredJob>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        jobs.remove(id)
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;
        Ok(())
    }

    async fn begin_job_run(&self, id: &JobId) -> Result<bool, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;
        if job.status == JobStatus::Running {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_job_status(&self, id: &JobId, status: JobStatus) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_job_statuses(&self) -> Result<usize, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut changed = 0;
        for job in jobs.values_mut() {
            if job.status != JobStatus::Idle {
                job.status = JobStatus::Idle;
                job.updated_at = Utc::now();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn save_task(&self, task: Task) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        if tasks.contains_key(&task.id) {
            return Err(StorageError::DuplicateKey(format!("task: {}", task.id)));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task, StorageError> {
        let tasks = self.tasks.read().map_err(|_| StorageError::LockPoisoned)?;
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StorageError> {
        let tasks = self.tasks.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = tasks.values().cloned().collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn update_task(&self, task: Task) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        if !tasks.contains_key(&task.id) {
            return Err(StorageError::NotFound(format!("task: {}", task.id)));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        tasks
            .remove(id)
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))?;
        Ok(())
    }

    async fn save_run(&self, run: StoredRun) -> Result<(), StorageError> {
        let mut runs = self.runs.write().map_err(|_| StorageError::LockPoisoned)?;
        if runs.contains_key(&run.runtime) {
            return Err(StorageError::DuplicateKey(format!("run: {}", run.runtime)));
        }
        runs.insert(run.runtime.clone(), run);
        Ok(())
    }

    async fn get_run(&self, runtime: &Runtime) -> Result<StoredRun, StorageError> {
        let runs = self.runs.read().map_err(|_| StorageError::LockPoisoned)?;
        runs.get(runtime)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("run: {}", runtime)))
    }

    async fn list_runs(&self, job_id: &JobId, limit: usize) -> Result<Vec<StoredRun>, StorageError> {
        let runs = self.runs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = runs
            .values()
            .filter(|r| &r.job_id == job_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.runtime.cmp(&a.runtime));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_child_runs(&self, parent: &Runtime) -> Result<Vec<StoredRun>, StorageError> {
        let runs = self.runs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = runs
            .values()
            .filter(|r| r.parent_runtime.as_ref() == Some(parent))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.runtime.cmp(&b.runtime));
        Ok(result)
    }

    async fn update_run(&self, run: StoredRun) -> Result<(), StorageError> {
        let mut runs = self.runs.write().map_err(|_| StorageError::LockPoisoned)?;
        if !runs.contains_key(&run.runtime) {
            return Err(StorageError::NotFound(format!("run: {}", run.runtime)));
        }
        runs.insert(run.runtime.clone(), run);
        Ok(())
    }

    async fn get_incomplete_runs(&self) -> Result<Vec<StoredRun>, StorageError> {
        let runs = self.runs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = runs
            .values()
            .filter(|r| r.status == RunStatus::Running)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.runtime.cmp(&b.runtime));
        Ok(result)
    }

    async fn mark_run_interrupted(&self, runtime: &Runtime) -> Result<(), StorageError> {
        let mut runs = self.runs.write().map_err(|_| StorageError::LockPoisoned)?;
        let run = runs
            .get_mut(runtime)
            .ok_or_else(|| StorageError::NotFound(format!("run: {}", runtime)))?;
        run.mark_interrupted();
        Ok(())
    }

    async fn save_result(&self, result: StoredResult) -> Result<(), StorageError> {
        let mut results = self.results.write().map_err(|_| StorageError::LockPoisoned)?;
        let key = result.key();
        if results.iter().any(|existing| existing.key() == key) {
            return Err(StorageError::DuplicateKey(format!(
                "result: {}/{}/{}",
                result.job_id,
                result.device_name.as_deref().unwrap_or("global"),
                result.runtime
            )));
        }
        results.push(result);
        Ok(())
    }

    async fn list_results(&self, filter: &ResultFilter) -> Result<Vec<StoredResult>, StorageError> {
        let results = self.results.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut matched: Vec<_> = results
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.runtime
                .cmp(&b.runtime)
                .then_with(|| a.device_name.cmp(&b.device_name))
        });
        Ok(matched)
    }

    async fn clear_results(&self, job_id: &JobId) -> Result<usize, StorageError> {
        let mut results = self.results.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = results.len();
        results.retain(|r| &r.job_id != job_id);
        Ok(before - results.len())
    }
}
