//! Common test utilities shared across integration tests.

use async_trait::async_trait;
use netrun::automation::Automation;
use netrun::scheduler::InMemoryScheduleStore;
use netrun::storage::{RunStatus, StoredRun};
use netrun::testing::TestHarness;
use netrun::{Event, EventHandler, JobId, Runtime, Scheduler, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Wait for a run to reach an expected status, polling storage.
///
/// Polls storage every 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the run reaches the expected status.
pub async fn wait_for_run_status(
    storage: &dyn Storage,
    runtime: &Runtime,
    expected: RunStatus,
    timeout: Duration,
) -> StoredRun {
    let start = tokio::time::Instant::now();
    loop {
        if let Ok(run) = storage.get_run(runtime).await {
            if run.status == expected {
                return run;
            }
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for run {} to reach {:?}",
                runtime, expected
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until a job has at least `count` runs, returning them newest first.
pub async fn wait_for_runs(
    storage: &dyn Storage,
    job: &JobId,
    count: usize,
    timeout: Duration,
) -> Vec<StoredRun> {
    let start = tokio::time::Instant::now();
    loop {
        let runs = storage.list_runs(job, 100).await.unwrap();
        if runs.len() >= count {
            return runs;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} run(s) of {}, found {}",
                count,
                job,
                runs.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Start a controller over a harness with a fast-ticking in-memory scheduler.
pub async fn start_automation(harness: &TestHarness) -> (Automation, JoinHandle<()>) {
    let scheduler = Scheduler::new(
        Arc::clone(harness.engine()),
        Arc::new(InMemoryScheduleStore::new()),
    )
    .with_tick_interval(Duration::from_millis(50));
    Automation::start(scheduler).await.unwrap()
}

/// Shut the scheduler down and wait for its loop to exit.
pub async fn stop(automation: Automation, task: JoinHandle<()>) {
    automation.scheduler().shutdown().await.unwrap();
    let _ = task.await;
}

/// Recording event handler for verifying events.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
