//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::trigger::{Trigger, TriggerError};
use crate::core::types::{JobId, ScheduleId, TaskId};
use crate::execution::RunRequest;
use crate::storage::StorageError;

use super::store::ScheduleEntry;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No entry with this schedule id.
    #[error("schedule not found: {0}")]
    NotFound(ScheduleId),

    /// The trigger could not be evaluated.
    #[error("trigger error: {0}")]
    Trigger(#[from] TriggerError),

    /// Schedule store or storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// No entry fires while paused; one-off dispatches still run.
    Paused,
}

/// Externally visible view of a schedule entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleInfo {
    pub id: ScheduleId,
    pub task_id: TaskId,
    pub next_run_time: Option<DateTime<Utc>>,
    pub paused: bool,
    /// Instances of this entry currently running.
    pub running: usize,
}

impl ScheduleInfo {
    pub(crate) fn from_entry(entry: ScheduleEntry, running: usize) -> Self {
        Self {
            id: entry.id,
            task_id: entry.task_id,
            next_run_time: entry.next_run_time,
            paused: entry.paused,
            running,
        }
    }
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SchedulerError>>;

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Add an entry, or reschedule an existing one.
    Register {
        id: ScheduleId,
        task_id: TaskId,
        trigger: Trigger,
        response: Reply<ScheduleInfo>,
    },
    Pause {
        id: ScheduleId,
        response: Reply<ScheduleInfo>,
    },
    Resume {
        id: ScheduleId,
        response: Reply<ScheduleInfo>,
    },
    Remove {
        id: ScheduleId,
        response: Reply<()>,
    },
    Get {
        id: ScheduleId,
        response: Reply<ScheduleInfo>,
    },
    List {
        response: Reply<Vec<ScheduleInfo>>,
    },
    /// Dispatch a job once, outside any entry.
    RunNow {
        job_id: JobId,
        request: RunRequest,
        response: Reply<()>,
    },
    /// Pause the whole scheduler.
    PauseAll { response: oneshot::Sender<()> },
    /// Resume the whole scheduler.
    ResumeAll { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
