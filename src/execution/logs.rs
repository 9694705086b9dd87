//! Per-runtime log buffers.
//!
//! Every line logged during a run is kept in memory under the top-level
//! runtime so it can be read back while the run is still going, and is
//! mirrored to `tracing`. Buffers are dropped per runtime with
//! [`RunLogs::clear`], and only the most recent finished top-level runs are
//! retained: once a run completes, the oldest finished buffers beyond the
//! retention bound are evicted.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, error, info, warn, Level};

use crate::core::types::Runtime;
use crate::events::{Event, EventHandler};

/// Number of finished top-level runs whose logs are kept by default.
pub const DEFAULT_LOG_RETENTION: usize = 1000;

/// Shared handle to the run log buffers.
#[derive(Debug, Clone)]
pub struct RunLogs {
    buffers: Arc<RwLock<HashMap<Runtime, Vec<String>>>>,
    /// Finished top-level runtimes, oldest first.
    finished: Arc<Mutex<VecDeque<Runtime>>>,
    retention: usize,
}

impl Default for RunLogs {
    fn default() -> Self {
        Self::with_retention(DEFAULT_LOG_RETENTION)
    }
}

impl RunLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the logs of at most `retention` finished top-level runs.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            buffers: Arc::new(RwLock::new(HashMap::new())),
            finished: Arc::new(Mutex::new(VecDeque::new())),
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Record `runtime` as finished and evict the oldest buffers beyond
    /// the retention bound.
    fn finish(&self, runtime: &Runtime) {
        let evicted: Vec<Runtime> = {
            let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
            finished.push_back(runtime.clone());
            let excess = finished.len().saturating_sub(self.retention);
            finished.drain(..excess).collect()
        };
        if evicted.is_empty() {
            return;
        }
        let mut buffers = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        for runtime in &evicted {
            buffers.remove(runtime);
        }
        debug!(evicted = evicted.len(), "evicted run log buffers");
    }

    /// A logger writing under `runtime`.
    pub fn logger(&self, runtime: Runtime) -> RunLogger {
        RunLogger {
            logs: self.clone(),
            runtime,
        }
    }

    /// Append a line and mirror it to tracing.
    pub fn log(&self, runtime: &Runtime, level: Level, device: Option<&str>, message: &str) {
        let content = match device {
            Some(device) => format!("DEVICE {} - {}", device, message),
            None => message.to_string(),
        };
        match level {
            Level::ERROR => error!(runtime = %runtime, "{}", content),
            Level::WARN => warn!(runtime = %runtime, "{}", content),
            Level::INFO => info!(runtime = %runtime, "{}", content),
            _ => debug!(runtime = %runtime, "{}", content),
        }

        let line = format!(
            "{} - {} - {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            level.as_str().to_lowercase(),
            content
        );
        let mut buffers = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        buffers.entry(runtime.clone()).or_default().push(line);
    }

    /// Lines logged so far under `runtime`.
    pub fn lines(&self, runtime: &Runtime) -> Vec<String> {
        let buffers = self.buffers.read().unwrap_or_else(PoisonError::into_inner);
        buffers.get(runtime).cloned().unwrap_or_default()
    }

    /// Lines logged under `runtime`, joined by newlines.
    pub fn text(&self, runtime: &Runtime) -> String {
        self.lines(runtime).join("\n")
    }

    /// Drop the buffer of one runtime. Returns whether it existed.
    pub fn clear(&self, runtime: &Runtime) -> bool {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|finished| finished != runtime);
        let mut buffers = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        buffers.remove(runtime).is_some()
    }

    pub fn runtimes(&self) -> Vec<Runtime> {
        let buffers = self.buffers.read().unwrap_or_else(PoisonError::into_inner);
        let mut runtimes: Vec<Runtime> = buffers.keys().cloned().collect();
        runtimes.sort();
        runtimes
    }
}

#[async_trait]
impl EventHandler for RunLogs {
    async fn handle(&self, event: &Event) {
        match event {
            Event::JobStarted {
                job_id,
                runtime,
                parent_runtime,
                ..
            } => {
                let key = parent_runtime.as_ref().unwrap_or(runtime);
                self.log(key, Level::INFO, None, &format!("{} started", job_id));
            }
            Event::JobCompleted {
                job_id,
                runtime,
                parent_runtime,
                success,
                duration,
                ..
            } => {
                let key = parent_runtime.as_ref().unwrap_or(runtime);
                let outcome = if *success { "passed" } else { "failed" };
                self.log(
                    key,
                    Level::INFO,
                    None,
                    &format!("{} {} in {:?}", job_id, outcome, duration),
                );
                if parent_runtime.is_none() {
                    self.finish(runtime);
                }
            }
            Event::DeviceCompleted {
                runtime,
                parent_runtime,
                device_id,
                success,
                ..
            } => {
                let key = parent_runtime.as_ref().unwrap_or(runtime);
                let (level, outcome) = if *success {
                    (Level::INFO, "passed")
                } else {
                    (Level::WARN, "failed")
                };
                self.log(key, level, Some(device_id.as_str()), outcome);
            }
            _ => {}
        }
    }
}

/// Logger bound to one runtime, handed to drivers.
#[derive(Debug, Clone)]
pub struct RunLogger {
    logs: RunLogs,
    runtime: Runtime,
}

impl RunLogger {
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn log(&self, level: Level, device: Option<&str>, message: &str) {
        self.logs.log(&self.runtime, level, device, message);
    }

    pub fn info(&self, device: Option<&str>, message: &str) {
        self.log(Level::INFO, device, message);
    }

    pub fn warn(&self, device: Option<&str>, message: &str) {
        self.log(Level::WARN, device, message);
    }

    pub fn error(&self, device: Option<&str>, message: &str) {
        self.log(Level::ERROR, device, message);
    }
}
