//! Scheduler for task execution.
//!
//! This module provides the timer loop that fires scheduled tasks into the
//! run engine, its control handle, and the durable schedule store.

mod engine;
mod handle;
mod store;
mod types;

pub use engine::{
    Scheduler, DEFAULT_FIRE_WORKERS, DEFAULT_MAX_INSTANCES, DEFAULT_MISFIRE_GRACE,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TICK_INTERVAL,
};
pub use handle::SchedulerHandle;
#[cfg(feature = "sqlite")]
pub use store::SqliteScheduleStore;
pub use store::{InMemoryScheduleStore, ScheduleEntry, ScheduleStore};
pub use types::{ScheduleInfo, SchedulerError, SchedulerState};
