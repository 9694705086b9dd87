//! Graceful shutdown integration tests.
//!
//! Tests that verify the scheduler waits for dispatched runs to complete
//! before exiting.

use crate::common::{start_automation, wait_for_run_status, RecordingHandler};
use netrun::automation::RunOptions;
use netrun::scheduler::{InMemoryScheduleStore, SchedulerState};
use netrun::storage::RunStatus;
use netrun::testing::TestHarness;
use netrun::{Event, JobId, Scheduler, Storage};
use std::sync::Arc;
use std::time::Duration;

/// Test: Shutdown waits for a dispatched run to finish.
#[tokio::test]
async fn test_shutdown_waits_for_running_job() {
    let harness = TestHarness::new();
    harness.add_service("slow", true);
    harness.driver().set_delay(Duration::from_millis(300));
    let recorder = RecordingHandler::new();
    harness.engine().event_bus().register(recorder.clone()).await;
    let (automation, task) = start_automation(&harness).await;

    let response = automation
        .run_job(
            &JobId::new("slow"),
            RunOptions {
                asynchronous: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_for_run_status(
        harness.storage().as_ref(),
        &response.runtime,
        RunStatus::Running,
        Duration::from_secs(2),
    )
    .await;

    automation.scheduler().shutdown().await.unwrap();
    task.await.unwrap();

    let run = harness.storage().get_run(&response.runtime).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(
        recorder
            .count(|e| matches!(e, Event::JobCompleted { success: true, .. }))
            .await
            >= 1
    );
}

/// Test: Shutdown gives up on runs that outlive the timeout.
#[tokio::test]
async fn test_shutdown_timeout() {
    let harness = TestHarness::new();
    harness.add_service("stuck", true);
    harness.driver().set_delay(Duration::from_secs(10));
    let scheduler = Scheduler::new(
        Arc::clone(harness.engine()),
        Arc::new(InMemoryScheduleStore::new()),
    )
    .with_tick_interval(Duration::from_millis(50))
    .with_shutdown_timeout(Duration::from_millis(200));
    let (handle, task) = scheduler.start().await;

    handle
        .run_now("stuck", netrun::RunRequest::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = tokio::time::Instant::now();
    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(handle.state().await, SchedulerState::Stopped);
}

/// Test: Commands after shutdown fail instead of hanging.
#[tokio::test]
async fn test_commands_after_shutdown_fail() {
    let harness = TestHarness::new();
    let (automation, task) = start_automation(&harness).await;
    let handle = automation.scheduler().clone();

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(handle.list().await.is_err());
    assert!(automation.pause_all().await.is_err());
}
