//! Recovery scenario integration tests.
//!
//! Tests that verify the system can recover from interruptions: runs left
//! open by a crash, stuck job statuses, and timers that must survive a
//! restart.

use crate::common::{start_automation, stop};
use netrun::core::trigger::{FrequencyUnit, TriggerSpec};
use netrun::scheduler::InMemoryScheduleStore;
use netrun::storage::{RunStatus, StoredJob, StoredRun};
use netrun::testing::TestHarness;
use netrun::{Automation, JobId, JobStatus, JobType, Runtime, Scheduler, Storage, Task};
use std::sync::Arc;

/// Test: Runs left Running are marked Interrupted and their jobs reset.
#[tokio::test]
async fn test_recover_interrupted_runs_on_startup() {
    let harness = TestHarness::new();
    harness.add_service("backup", true);
    let storage = harness.storage();

    let mut job = StoredJob::new(JobId::new("backup"), "BACKUP", JobType::Service);
    job.status = JobStatus::Running;
    storage.save_job(job).await.unwrap();
    let open = StoredRun::new(Runtime::now(), JobId::new("backup"), "BACKUP");
    storage.save_run(open.clone()).await.unwrap();

    let mut finished = StoredRun::new(Runtime::now(), JobId::new("backup"), "BACKUP");
    finished.mark_finished(true);
    storage.save_run(finished.clone()).await.unwrap();

    let (automation, task) = start_automation(&harness).await;

    let open = storage.get_run(&open.runtime).await.unwrap();
    assert_eq!(open.status, RunStatus::Interrupted);
    let finished = storage.get_run(&finished.runtime).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(
        storage.get_job(&JobId::new("backup")).await.unwrap().status,
        JobStatus::Idle
    );

    // The job runs again once recovered.
    let response = automation
        .run_job(&JobId::new("backup"), Default::default())
        .await
        .unwrap();
    assert!(response.outcome.unwrap().success);

    stop(automation, task).await;
}

/// Test: Recovery handles empty storage gracefully.
#[tokio::test]
async fn test_recovery_with_empty_storage() {
    let harness = TestHarness::new();
    let scheduler = Scheduler::new(
        Arc::clone(harness.engine()),
        Arc::new(InMemoryScheduleStore::new()),
    );

    let recovered = scheduler.recover().await.unwrap();
    assert!(recovered.is_empty());
}

/// Test: Active tasks without a timer are re-armed on startup.
#[tokio::test]
async fn test_startup_rearms_active_tasks() {
    let harness = TestHarness::new();
    harness.add_service("backup", true);
    let storage = harness.storage();
    storage
        .save_task(
            Task::new("hourly", "Hourly", "backup", TriggerSpec::every(1, FrequencyUnit::Hours))
                .with_schedule_id("hourly")
                .active(),
        )
        .await
        .unwrap();

    let (automation, task) = start_automation(&harness).await;

    let next = automation.next_run_time(&"hourly".into()).await.unwrap();
    assert!(next.is_some());

    stop(automation, task).await;
}

/// Test: Timers in a SQLite schedule store survive a restart.
#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_timers_survive_restart() {
    use netrun::scheduler::SqliteScheduleStore;
    use std::time::Duration;
    use tempfile::TempDir;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("schedules.db");
    let harness = TestHarness::new();
    harness.add_service("backup", true);

    let next = {
        let store = Arc::new(SqliteScheduleStore::new(&path).await.unwrap());
        let scheduler = Scheduler::new(Arc::clone(harness.engine()), store.clone())
            .with_tick_interval(Duration::from_millis(50));
        let (automation, task) = Automation::start(scheduler).await.unwrap();
        let created = automation
            .create_task(
                Task::new("hourly", "Hourly", "backup", TriggerSpec::every(1, FrequencyUnit::Hours))
                    .active(),
            )
            .await
            .unwrap();
        let next = automation.next_run_time(&created.id).await.unwrap();
        stop(automation, task).await;
        store.close().await;
        next
    };

    let store = Arc::new(SqliteScheduleStore::new(&path).await.unwrap());
    let scheduler = Scheduler::new(Arc::clone(harness.engine()), store)
        .with_tick_interval(Duration::from_millis(50));
    let (automation, task) = Automation::start(scheduler).await.unwrap();

    let entries = automation.scheduler().list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].next_run_time, next);

    stop(automation, task).await;
}
