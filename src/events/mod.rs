//! Lifecycle events and event handling.
//!
//! Events are emitted by the run engine and the scheduler so that run logs,
//! metrics or UIs can observe execution without being coupled to it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{DeviceId, JobId, Runtime, ScheduleId, TaskId};

/// Lifecycle events emitted during scheduling and execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A job run has started.
    JobStarted {
        job_id: JobId,
        runtime: Runtime,
        parent_runtime: Option<Runtime>,
        timestamp: Instant,
    },

    /// A job run finished, successfully or not.
    JobCompleted {
        job_id: JobId,
        runtime: Runtime,
        parent_runtime: Option<Runtime>,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },

    /// A service finished on one device.
    DeviceCompleted {
        job_id: JobId,
        runtime: Runtime,
        parent_runtime: Option<Runtime>,
        device_id: DeviceId,
        success: bool,
        timestamp: Instant,
    },

    /// The scheduler dispatched a task.
    TaskFired {
        schedule_id: ScheduleId,
        task_id: TaskId,
        timestamp: Instant,
    },

    /// A fire was dropped because it was later than the misfire grace.
    TaskMisfired {
        schedule_id: ScheduleId,
        task_id: TaskId,
        late_by: Duration,
        timestamp: Instant,
    },

    /// A fire was dropped because the instance cap was reached.
    TaskSkipped {
        schedule_id: ScheduleId,
        task_id: TaskId,
        running: usize,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::JobStarted { timestamp, .. }
            | Event::JobCompleted { timestamp, .. }
            | Event::DeviceCompleted { timestamp, .. }
            | Event::TaskFired { timestamp, .. }
            | Event::TaskMisfired { timestamp, .. }
            | Event::TaskSkipped { timestamp, .. } => *timestamp,
        }
    }

    /// The runtime this event belongs to, for run-scoped events.
    pub fn runtime(&self) -> Option<&Runtime> {
        match self {
            Event::JobStarted { runtime, .. }
            | Event::JobCompleted { runtime, .. }
            | Event::DeviceCompleted { runtime, .. } => Some(runtime),
            _ => None,
        }
    }

    /// Create a JobStarted event.
    pub fn job_started(job_id: JobId, runtime: Runtime, parent_runtime: Option<Runtime>) -> Self {
        Event::JobStarted {
            job_id,
            runtime,
            parent_runtime,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobCompleted event.
    pub fn job_completed(
        job_id: JobId,
        runtime: Runtime,
        parent_runtime: Option<Runtime>,
        success: bool,
        duration: Duration,
    ) -> Self {
        Event::JobCompleted {
            job_id,
            runtime,
            parent_runtime,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a DeviceCompleted event.
    pub fn device_completed(
        job_id: JobId,
        runtime: Runtime,
        parent_runtime: Option<Runtime>,
        device_id: DeviceId,
        success: bool,
    ) -> Self {
        Event::DeviceCompleted {
            job_id,
            runtime,
            parent_runtime,
            device_id,
            success,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFired event.
    pub fn task_fired(schedule_id: ScheduleId, task_id: TaskId) -> Self {
        Event::TaskFired {
            schedule_id,
            task_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskMisfired event.
    pub fn task_misfired(schedule_id: ScheduleId, task_id: TaskId, late_by: Duration) -> Self {
        Event::TaskMisfired {
            schedule_id,
            task_id,
            late_by,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSkipped event.
    pub fn task_skipped(schedule_id: ScheduleId, task_id: TaskId, running: usize) -> Self {
        Event::TaskSkipped {
            schedule_id,
            task_id,
            running,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
