//! Controller error type and its serializable form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::catalog::CatalogError;
use crate::core::trigger::TriggerError;
use crate::core::workflow::WorkflowError;
use crate::execution::EngineError;
use crate::results::ResultsError;
use crate::scheduler::SchedulerError;
use crate::storage::StorageError;

/// Message shown when a task's record or timer has disappeared.
pub const TASK_GONE: &str = "This task no longer exists.";

/// Error body returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Errors surfaced by the automation controller.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// The job is already running.
    #[error("{0}")]
    AlreadyRunning(String),
    /// The referenced object does not exist.
    #[error("{0}")]
    NotFound(String),
    /// A workflow graph or service definition cannot run.
    #[error("{0}")]
    Structural(String),
    /// A write collided with existing data.
    #[error("{0}")]
    PersistenceConflict(String),
    /// The request itself is invalid.
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Internal(String),
}

impl AutomationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Structural(_) => "STRUCTURAL",
            Self::PersistenceConflict(_) => "CONFLICT",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        }
    }
}

impl From<AutomationError> for ErrorResponse {
    fn from(err: AutomationError) -> Self {
        err.to_response()
    }
}

impl From<StorageError> for AutomationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::DuplicateKey(msg) => Self::PersistenceConflict(msg),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<WorkflowError> for AutomationError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::DuplicateEdge(_) => Self::PersistenceConflict(err.to_string()),
            WorkflowError::EdgeNotFound(_) => Self::NotFound(err.to_string()),
            _ => Self::Structural(err.to_string()),
        }
    }
}

impl From<CatalogError> for AutomationError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::JobNotFound(_)
            | CatalogError::DeviceNotFound(_)
            | CatalogError::PoolNotFound(_) => Self::NotFound(err.to_string()),
            CatalogError::DuplicateJob(_) => Self::PersistenceConflict(err.to_string()),
            CatalogError::Workflow(e) => e.into(),
            CatalogError::NotAWorkflow(_) | CatalogError::Pool(_) => {
                Self::InvalidInput(err.to_string())
            }
            CatalogError::LockPoisoned => Self::Internal(err.to_string()),
        }
    }
}

impl From<EngineError> for AutomationError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::AlreadyRunning { .. } => Self::AlreadyRunning(err.to_string()),
            EngineError::Structural(e) => Self::Structural(e.to_string()),
            EngineError::Catalog(e) => e.into(),
            EngineError::Driver(e) => Self::Structural(e.to_string()),
            EngineError::Storage(e) => e.into(),
        }
    }
}

impl From<SchedulerError> for AutomationError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(_) => Self::NotFound(TASK_GONE.to_string()),
            SchedulerError::Trigger(e) => e.into(),
            SchedulerError::Storage(e) => e.into(),
            SchedulerError::ChannelError(msg) => Self::Internal(msg),
        }
    }
}

impl From<TriggerError> for AutomationError {
    fn from(err: TriggerError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<ResultsError> for AutomationError {
    fn from(err: ResultsError) -> Self {
        match err {
            ResultsError::NotFound(what) => Self::NotFound(format!("no result for {}", what)),
            ResultsError::Storage(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::JobId;

    #[test]
    fn test_error_codes_and_messages() {
        let err: AutomationError = EngineError::AlreadyRunning {
            job_id: JobId::new("wf"),
            job_type: crate::core::job::JobType::Workflow,
        }
        .into();
        assert_eq!(
            err.to_response(),
            ErrorResponse {
                error: "Workflow is already running.".into(),
                code: "ALREADY_RUNNING".into(),
            }
        );

        let err: AutomationError = SchedulerError::NotFound("x".into()).into();
        assert_eq!(err.to_string(), TASK_GONE);
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_catalog_mapping() {
        let dup: AutomationError =
            CatalogError::Workflow(WorkflowError::DuplicateEdge("wf-success:a->b".into())).into();
        assert!(matches!(dup, AutomationError::PersistenceConflict(_)));

        let missing: AutomationError = CatalogError::JobNotFound(JobId::new("nope")).into();
        assert!(matches!(missing, AutomationError::NotFound(_)));

        let structural: AutomationError =
            WorkflowError::NoStartPoint(JobId::new("wf")).into();
        assert_eq!(structural.code(), "STRUCTURAL");
    }
}
