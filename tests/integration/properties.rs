//! End-to-end checks of the platform's core guarantees.

use crate::common::{start_automation, stop};
use chrono::{TimeZone, Utc};
use netrun::automation::{AutomationError, RestartOptions, RunOptions};
use netrun::core::trigger::{FrequencyUnit, Trigger, TriggerSpec};
use netrun::execution::{NodeState, RunRequest};
use netrun::results::{self, DeviceSelector, ResultSource, Tag};
use netrun::storage::{DeviceFilter, ResultFilter};
use netrun::testing::TestHarness;
use netrun::{EdgeSubtype, JobId, Storage};
use serde_json::json;

/// An interval task fires at exact multiples of its period after its start.
#[test]
fn test_interval_fires_are_evenly_spaced() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let spec = TriggerSpec::every(10, FrequencyUnit::Minutes).starting("01/05/2024 12:30:00");
    let trigger = Trigger::from_spec(&spec, now).unwrap();

    let fires = trigger.next_n_after(now, 5).unwrap();

    assert_eq!(fires.len(), 5);
    assert_eq!(fires[0], Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());
    for pair in fires.windows(2) {
        assert_eq!((pair[1] - pair[0]).num_seconds(), 600);
    }
}

/// Registering the same timer twice leaves a single entry.
#[tokio::test]
async fn test_registration_is_idempotent() {
    let harness = TestHarness::new();
    harness.add_service("backup", true);
    let (automation, task) = start_automation(&harness).await;

    let spec = TriggerSpec::every(1, FrequencyUnit::Hours);
    let trigger = Trigger::from_spec(&spec, Utc::now()).unwrap();
    automation
        .scheduler()
        .register("nightly", "nightly-task", trigger.clone())
        .await
        .unwrap();
    automation
        .scheduler()
        .register("nightly", "nightly-task", trigger)
        .await
        .unwrap();

    let entries = automation.scheduler().list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id.as_str(), "nightly");

    stop(automation, task).await;
}

/// Comparing a payload with itself yields only equal lines.
#[test]
fn test_diff_of_identical_payloads_is_all_equal() {
    let payload = json!({
        "success": true,
        "devices": {"r1": {"result": "hostname r1\ninterface eth0"}},
        "logs": ["one", "two"],
    });

    let comparison = results::diff(&payload, &payload);

    assert!(!comparison.opcodes.is_empty());
    assert!(comparison.opcodes.iter().all(|op| op.tag == Tag::Equal));
    assert_eq!(comparison.first, comparison.second);
}

/// A fails: its failure branch runs and its success branch does not.
#[tokio::test]
async fn test_failure_branch_produces_two_child_results() {
    let harness = TestHarness::new();
    harness.add_service("a", true);
    harness.add_service("b", true);
    harness.add_service("c", true);
    harness.add_workflow(
        "wf",
        &["a", "b", "c"],
        &[
            (EdgeSubtype::Success, "a", "b"),
            (EdgeSubtype::Failure, "a", "c"),
        ],
    );
    harness.driver().fail_job("a");

    let outcome = harness
        .run("wf", RunRequest::new().with_start_points(["a"]))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.state(&JobId::new("a")), Some(NodeState::Failed));
    assert_eq!(outcome.state(&JobId::new("b")), Some(NodeState::Skipped));
    assert_eq!(outcome.state(&JobId::new("c")), Some(NodeState::Succeeded));

    let children = harness
        .storage()
        .list_results(
            &ResultFilter::new()
                .parent_runtime(outcome.runtime.clone())
                .device(DeviceFilter::Global),
        )
        .await
        .unwrap();
    let mut jobs: Vec<_> = children.iter().map(|r| r.job_id.as_str().to_string()).collect();
    jobs.sort();
    assert_eq!(jobs, vec!["a", "c"]);
    assert!(harness.driver().calls_for(&JobId::new("b")).is_empty());
}

/// A running job is refused before anything reaches the scheduler.
#[tokio::test]
async fn test_already_running_never_reaches_scheduler() {
    let harness = TestHarness::new();
    harness.add_service("backup", true);
    let (automation, task) = start_automation(&harness).await;

    automation
        .run_job(&JobId::new("backup"), RunOptions::default())
        .await
        .unwrap();
    harness
        .storage()
        .set_job_status(&JobId::new("backup"), netrun::JobStatus::Running)
        .await
        .unwrap();

    let err = automation
        .run_job(
            &JobId::new("backup"),
            RunOptions {
                asynchronous: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AutomationError::AlreadyRunning(_)));
    assert_eq!(err.to_response().error, "Service is already running.");
    assert!(automation.scheduler().list().await.unwrap().is_empty());
    assert_eq!(harness.driver().calls().len(), 1);

    stop(automation, task).await;
}

/// The "all failed" selector returns exactly the failed devices.
#[tokio::test]
async fn test_all_failed_selector() {
    let harness = TestHarness::new().with_devices(["r1", "r2", "r3"]);
    harness.add_service("backup", false);
    harness.driver().fail_device("r2");

    let outcome = harness
        .run(
            "backup",
            netrun::RunRequest::new().with_targets(["r1", "r2", "r3"]),
        )
        .await
        .unwrap();
    assert!(!outcome.success);

    let failed = results::get_results(
        harness.storage().as_ref(),
        &ResultSource::Service {
            service: JobId::new("backup"),
            runtime: outcome.runtime.clone(),
            device: DeviceSelector::AllFailed,
        },
    )
    .await
    .unwrap()
    .unwrap();
    let failed = failed.as_object().unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed.contains_key("r2"));

    let passed = results::get_results(
        harness.storage().as_ref(),
        &ResultSource::Service {
            service: JobId::new("backup"),
            runtime: outcome.runtime,
            device: DeviceSelector::AllPassed,
        },
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(passed.as_object().unwrap().len(), 2);
}

/// Deleting a node removes every edge that touches it.
#[tokio::test]
async fn test_delete_node_removes_its_edges() {
    let harness = TestHarness::new();
    for id in ["a", "b", "c"] {
        harness.add_service(id, true);
    }
    harness.add_workflow(
        "wf",
        &["a", "b", "c"],
        &[
            (EdgeSubtype::Success, "a", "b"),
            (EdgeSubtype::Failure, "b", "c"),
            (EdgeSubtype::Success, "a", "c"),
        ],
    );
    let (automation, task) = start_automation(&harness).await;

    let removed = automation
        .delete_node(&JobId::new("wf"), &JobId::new("b"))
        .unwrap();

    assert_eq!(removed.len(), 2);
    let wf = harness.catalog().job(&JobId::new("wf")).unwrap();
    let workflow = wf.as_workflow().unwrap();
    assert_eq!(workflow.edges().len(), 1);
    assert!(workflow
        .edges()
        .iter()
        .all(|e| e.source.as_str() != "b" && e.destination.as_str() != "b"));
    assert!(!workflow.jobs().contains(&JobId::new("b")));

    stop(automation, task).await;
}

/// A restart reuses only the selected earlier results.
#[tokio::test]
async fn test_restart_reuses_selected_payloads() {
    let harness = TestHarness::new();
    for id in ["a", "b", "c"] {
        harness.add_service(id, true);
    }
    harness.add_workflow(
        "wf",
        &["a", "b", "c"],
        &[
            (EdgeSubtype::Success, "a", "b"),
            (EdgeSubtype::Success, "b", "c"),
        ],
    );
    let (automation, task) = start_automation(&harness).await;

    let first = automation
        .run_job(&JobId::new("wf"), RunOptions::default())
        .await
        .unwrap();
    let restarted = automation
        .restart_workflow(
            &JobId::new("wf"),
            RestartOptions {
                payload_version: Some(first.runtime.clone()),
                payloads_to_include: vec!["A".into()],
                start_points: vec![JobId::new("b")],
                asynchronous: false,
            },
        )
        .await
        .unwrap();

    let outcome = restarted.outcome.unwrap();
    assert!(outcome.success);
    assert_eq!(harness.driver().calls_for(&JobId::new("a")).len(), 1);

    // B saw only A's reused result in its payload.
    let b_result = &outcome.result["results"]["B"];
    assert_eq!(b_result["result"]["payload_keys"], json!(["A"]));
    let c_result = &outcome.result["results"]["C"];
    assert_eq!(c_result["result"]["payload_keys"], json!(["A", "B"]));

    stop(automation, task).await;
}
