//! Automation controller.
//!
//! The controller is the user-facing surface of the platform: running and
//! restarting jobs, managing task timers, reading and comparing results, and
//! editing workflows. Every failure is an [`AutomationError`], which turns
//! into a serializable [`ErrorResponse`].

mod controller;
mod errors;

pub use controller::{
    format_countdown, to_json, Automation, RestartOptions, RunOptions, RunResponse, TaskAction,
};
pub use errors::{AutomationError, ErrorResponse, TASK_GONE};
