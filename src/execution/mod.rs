//! Job execution.
//!
//! This module provides the run engine, the device driver seam with its
//! built-in drivers, and the per-runtime log buffers.

mod command;
mod driver;
mod engine;
mod logs;

pub use command::CommandDriver;
pub use driver::{DeviceDriver, DriverError, DriverOutput, DriverRegistry, DriverRequest, NoopDriver};
pub use engine::{
    EngineError, NodeState, RunEngine, RunOutcome, RunRequest, DEFAULT_WORKER_POOL_SIZE,
};
pub use logs::{RunLogger, RunLogs, DEFAULT_LOG_RETENTION};
