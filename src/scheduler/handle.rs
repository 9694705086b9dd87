//! Scheduler handle for controlling the scheduler.
//!
//! This module provides the `SchedulerHandle` type that allows external control
//! of the scheduler: registering and editing entries, one-off dispatch, pause,
//! resume, and shutdown.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::core::trigger::Trigger;
use crate::core::types::{JobId, ScheduleId, TaskId};
use crate::execution::RunRequest;

use super::types::{Reply, ScheduleInfo, SchedulerCommand, SchedulerError, SchedulerState};

/// Buffer size for the command channel between SchedulerHandle and Scheduler.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for controlling the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) command_tx: mpsc::Sender<SchedulerCommand>,
    pub(crate) state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    /// Helper to send a command that returns a result and wait for response.
    async fn send_result_command<T>(
        &self,
        build_command: impl FnOnce(Reply<T>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })?
    }

    /// Helper to send a command that returns unit and wait for response.
    async fn send_unit_command(
        &self,
        build_command: impl FnOnce(oneshot::Sender<()>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<(), SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })?;

        Ok(())
    }

    /// Add an entry, or reschedule the existing entry with this id.
    ///
    /// Registering twice with the same id leaves a single entry. A paused
    /// entry is resumed.
    pub async fn register(
        &self,
        id: impl Into<ScheduleId>,
        task_id: impl Into<TaskId>,
        trigger: Trigger,
    ) -> Result<ScheduleInfo, SchedulerError> {
        let (id, task_id) = (id.into(), task_id.into());
        self.send_result_command(
            |response| SchedulerCommand::Register {
                id,
                task_id,
                trigger,
                response,
            },
            "register",
        )
        .await
    }

    /// Stop an entry from firing until resumed.
    pub async fn pause(&self, id: impl Into<ScheduleId>) -> Result<ScheduleInfo, SchedulerError> {
        let id = id.into();
        self.send_result_command(|response| SchedulerCommand::Pause { id, response }, "pause")
            .await
    }

    /// Resume a paused entry from its next fire after now.
    pub async fn resume(&self, id: impl Into<ScheduleId>) -> Result<ScheduleInfo, SchedulerError> {
        let id = id.into();
        self.send_result_command(|response| SchedulerCommand::Resume { id, response }, "resume")
            .await
    }

    /// Remove an entry. Runs already dispatched are not interrupted.
    pub async fn remove(&self, id: impl Into<ScheduleId>) -> Result<(), SchedulerError> {
        let id = id.into();
        self.send_result_command(|response| SchedulerCommand::Remove { id, response }, "remove")
            .await
    }

    pub async fn get(&self, id: impl Into<ScheduleId>) -> Result<ScheduleInfo, SchedulerError> {
        let id = id.into();
        self.send_result_command(|response| SchedulerCommand::Get { id, response }, "get")
            .await
    }

    pub async fn list(&self) -> Result<Vec<ScheduleInfo>, SchedulerError> {
        self.send_result_command(|response| SchedulerCommand::List { response }, "list")
            .await
    }

    /// Dispatch a job once through the worker pool.
    ///
    /// Returns as soon as the run is handed over.
    pub async fn run_now(
        &self,
        job_id: impl Into<JobId>,
        request: RunRequest,
    ) -> Result<(), SchedulerError> {
        let job_id = job_id.into();
        self.send_result_command(
            |response| SchedulerCommand::RunNow {
                job_id,
                request,
                response,
            },
            "run_now",
        )
        .await
    }

    /// Pause the scheduler.
    ///
    /// While paused, no entry fires, but one-off dispatches still work.
    pub async fn pause_all(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::PauseAll { response }, "pause_all")
            .await
    }

    /// Resume the scheduler after being paused.
    pub async fn resume_all(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::ResumeAll { response }, "resume_all")
            .await
    }

    /// Shutdown the scheduler, waiting for in-flight runs up to the shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(
            |response| SchedulerCommand::Shutdown { response },
            "shutdown",
        )
        .await
    }

    /// Get the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Check if the scheduler is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == SchedulerState::Running
    }

    /// Check if the scheduler is paused.
    pub async fn is_paused(&self) -> bool {
        *self.state.read().await == SchedulerState::Paused
    }
}
