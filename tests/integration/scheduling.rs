//! Scheduled task integration tests.
//!
//! Tasks created through the controller fire into the run engine with
//! freshly resolved targets.

use crate::common::{start_automation, stop, wait_for_runs, RecordingHandler};
use netrun::core::device::{Device, MatchKind, Pool};
use netrun::core::trigger::{FrequencyUnit, TriggerSpec};
use netrun::storage::{DeviceFilter, ResultFilter};
use netrun::testing::TestHarness;
use netrun::{Event, JobId, Storage, Task, TaskAction};
use std::time::Duration;

#[tokio::test]
async fn test_task_fires_against_pool_members() {
    let harness = TestHarness::new();
    harness.add_device(Device::new("r1", "r1").with_property("vendor", "Cisco"));
    harness.add_device(Device::new("r2", "r2").with_property("vendor", "Juniper"));
    harness
        .catalog()
        .insert_pool(Pool::new("cisco", "Cisco").with_criterion("vendor", "Cisco", MatchKind::Equality))
        .unwrap();
    harness.add_service("backup", false);
    let recorder = RecordingHandler::new();
    harness.engine().event_bus().register(recorder.clone()).await;
    let (automation, task) = start_automation(&harness).await;

    automation
        .create_task(
            Task::new("every-second", "Every second", "backup", TriggerSpec::every(1, FrequencyUnit::Seconds))
                .with_pools(["cisco"])
                .active(),
        )
        .await
        .unwrap();

    let runs = wait_for_runs(
        harness.storage().as_ref(),
        &JobId::new("backup"),
        1,
        Duration::from_secs(5),
    )
    .await;
    automation
        .task_action(&"every-second".into(), TaskAction::Pause)
        .await
        .unwrap();
    stop(automation, task).await;

    let run = &runs[0];
    assert_eq!(run.task_id.as_ref().map(|t| t.as_str()), Some("every-second"));
    let devices = harness
        .storage()
        .list_results(
            &ResultFilter::new()
                .runtime(run.runtime.clone())
                .device(DeviceFilter::AnyDevice),
        )
        .await
        .unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id.as_ref().map(|d| d.as_str()), Some("r1"));
    assert!(recorder.count(|e| matches!(e, Event::TaskFired { .. })).await >= 1);
}

#[tokio::test]
async fn test_pool_membership_is_resolved_at_fire_time() {
    let harness = TestHarness::new();
    harness.add_device(Device::new("r1", "r1").with_property("vendor", "Cisco"));
    harness
        .catalog()
        .insert_pool(Pool::new("cisco", "Cisco").with_criterion("vendor", "Cisco", MatchKind::Equality))
        .unwrap();
    harness.add_service("backup", false);
    let (automation, task) = start_automation(&harness).await;

    let created = automation
        .create_task(
            Task::new("nightly", "Nightly", "backup", TriggerSpec::every(1, FrequencyUnit::Hours))
                .with_pools(["cisco"]),
        )
        .await
        .unwrap();
    assert_eq!(automation.compute_targets(&created.id).await.unwrap().len(), 1);

    harness.add_device(Device::new("r9", "r9").with_property("vendor", "Cisco"));
    let targets = automation.compute_targets(&created.id).await.unwrap();
    assert_eq!(targets.len(), 2);

    stop(automation, task).await;
}

#[tokio::test]
async fn test_paused_task_does_not_fire() {
    let harness = TestHarness::new();
    harness.add_service("ping", true);
    let (automation, task) = start_automation(&harness).await;

    automation
        .create_task(
            Task::new("fast", "Fast", "ping", TriggerSpec::every(1, FrequencyUnit::Seconds)).active(),
        )
        .await
        .unwrap();
    automation
        .task_action(&"fast".into(), TaskAction::Pause)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(harness.driver().calls().is_empty());
    assert_eq!(automation.next_run_time(&"fast".into()).await.unwrap(), None);

    stop(automation, task).await;
}

#[tokio::test]
async fn test_deleting_task_keeps_in_flight_run() {
    let harness = TestHarness::new();
    harness.add_service("slow", true);
    harness.driver().set_delay(Duration::from_millis(400));
    let (automation, task) = start_automation(&harness).await;

    automation
        .create_task(Task::new("once", "Once", "slow", TriggerSpec::immediate()).active())
        .await
        .unwrap();
    let runs = wait_for_runs(
        harness.storage().as_ref(),
        &JobId::new("slow"),
        1,
        Duration::from_secs(5),
    )
    .await;

    automation
        .task_action(&"once".into(), TaskAction::Delete)
        .await
        .unwrap();
    stop(automation, task).await;

    let run = harness.storage().get_run(&runs[0].runtime).await.unwrap();
    assert_eq!(run.success, Some(true));
    assert!(harness.storage().list_tasks().await.unwrap().is_empty());
}
