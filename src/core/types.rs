//! Core identifier types for the orchestrator.
//!
//! These types provide type-safe identifiers for jobs, tasks, devices, pools,
//! scheduler entries, and runs.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Unique identifier for a job (service or workflow).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

/// Unique identifier for a scheduled task definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

/// Unique identifier for a network device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

/// Unique identifier for a device pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(String);

/// Stable key of a live timer in the scheduler.
///
/// Assigned once when a task is created and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleId(String);

macro_rules! string_id {
    ($($name:ident),+) => {
        $(
            impl $name {
                /// Create a new identifier from a string.
                pub fn new(id: impl Into<String>) -> Self {
                    Self(id.into())
                }

                /// Get the underlying string value.
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl From<&str> for $name {
                fn from(s: &str) -> Self {
                    Self::new(s)
                }
            }

            impl From<String> for $name {
                fn from(s: String) -> Self {
                    Self::new(s)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )+
    };
}

string_id!(JobId, TaskId, DeviceId, PoolId, ScheduleId);

/// Sortable timestamp string identifying one run.
///
/// Rendered as `YYYY-MM-DD HH:MM:SS.ffffff` in UTC, so lexicographic order
/// matches chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Runtime(String);

pub const RUNTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

static LAST_RUNTIME_MICROS: AtomicI64 = AtomicI64::new(0);

impl Runtime {
    /// Generate a runtime for the current instant.
    ///
    /// Successive calls within the process always produce strictly increasing
    /// values, even when the clock does not advance between them.
    pub fn now() -> Self {
        let now = Utc::now().timestamp_micros();
        let mut last = LAST_RUNTIME_MICROS.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match LAST_RUNTIME_MICROS.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Self::from_micros(next),
                Err(actual) => last = actual,
            }
        }
    }

    /// Render a runtime for the given instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self(instant.format(RUNTIME_FORMAT).to_string())
    }

    fn from_micros(micros: i64) -> Self {
        match Utc.timestamp_micros(micros).single() {
            Some(instant) => Self::at(instant),
            None => Self::at(Utc::now()),
        }
    }

    /// Wrap an existing runtime string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Runtime {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Runtime {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
