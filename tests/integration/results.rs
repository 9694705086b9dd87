//! Result queries, comparison and cleanup through the controller.

use crate::common::{start_automation, stop};
use netrun::automation::{AutomationError, RunOptions};
use netrun::results::{DeviceSelector, ResultSource, RuntimeScope, Tag};
use netrun::testing::TestHarness;
use netrun::{DeviceId, JobId, Runtime, Storage};
use serde_json::{json, Map};

fn options(payload: serde_json::Value) -> RunOptions {
    let payload: Map<String, serde_json::Value> = match payload {
        serde_json::Value::Object(map) => map,
        _ => Map::new(),
    };
    RunOptions {
        payload,
        targets: Some(vec![DeviceId::new("r1"), DeviceId::new("r2")]),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_compare_device_output_across_runs() {
    let harness = TestHarness::new().with_devices(["r1", "r2"]);
    harness.add_service("backup", false);
    let (automation, task) = start_automation(&harness).await;
    let backup = JobId::new("backup");

    let first = automation
        .run_job(&backup, options(json!({})))
        .await
        .unwrap();
    let second = automation
        .run_job(&backup, options(json!({"config": "changed"})))
        .await
        .unwrap();

    let source = |runtime: &Runtime| ResultSource::Service {
        service: backup.clone(),
        runtime: runtime.clone(),
        device: DeviceSelector::Device(DeviceId::new("r1")),
    };
    let comparison = automation
        .compare_results(&source(&first.runtime), &source(&second.runtime))
        .await
        .unwrap();
    assert!(comparison.opcodes.iter().any(|op| op.tag != Tag::Equal));
    assert!(comparison.second.iter().any(|line| line.contains("config")));
    assert!(!comparison.first.iter().any(|line| line.contains("config")));

    let same = automation
        .compare_results(&source(&first.runtime), &source(&first.runtime))
        .await
        .unwrap();
    assert!(same.opcodes.iter().all(|op| op.tag == Tag::Equal));

    stop(automation, task).await;
}

#[tokio::test]
async fn test_compare_missing_side_is_not_found() {
    let harness = TestHarness::new().with_devices(["r1"]);
    harness.add_service("backup", false);
    let (automation, task) = start_automation(&harness).await;

    let source = ResultSource::Device {
        device: DeviceId::new("r1"),
        runtime: Runtime::new("1999-01-01 00:00:00.000000"),
    };
    let err = automation
        .compare_results(&source, &source)
        .await
        .unwrap_err();
    assert!(matches!(err, AutomationError::NotFound(_)));
    assert_eq!(err.code(), "NOT_FOUND");

    stop(automation, task).await;
}

#[tokio::test]
async fn test_runtimes_and_device_choices() {
    let harness = TestHarness::new().with_devices(["r1", "r2"]);
    harness.add_service("backup", false);
    let (automation, task) = start_automation(&harness).await;
    let backup = JobId::new("backup");

    let first = automation.run_job(&backup, options(json!({}))).await.unwrap();
    let second = automation.run_job(&backup, options(json!({}))).await.unwrap();

    let runtimes = automation
        .get_runtimes(&RuntimeScope::Job(backup.clone()))
        .await
        .unwrap();
    assert_eq!(runtimes, vec![first.runtime.clone(), second.runtime.clone()]);
    let by_device = automation
        .get_runtimes(&RuntimeScope::Device(DeviceId::new("r2")))
        .await
        .unwrap();
    assert_eq!(by_device.len(), 2);

    let devices = automation
        .get_device_list(&first.runtime, Some(&backup))
        .await
        .unwrap();
    let values: Vec<_> = devices.iter().map(|(value, _)| value.as_str()).collect();
    assert!(values.contains(&"r1"));
    assert!(values.contains(&"r2"));

    stop(automation, task).await;
}

#[tokio::test]
async fn test_clear_results_and_reset_status() {
    let harness = TestHarness::new().with_devices(["r1", "r2"]);
    harness.add_service("backup", false);
    let (automation, task) = start_automation(&harness).await;
    let backup = JobId::new("backup");

    let response = automation.run_job(&backup, options(json!({}))).await.unwrap();
    // One global result and one per device.
    assert_eq!(automation.clear_results(&backup).await.unwrap(), 3);
    assert!(automation
        .get_results(&ResultSource::Service {
            service: backup.clone(),
            runtime: response.runtime.clone(),
            device: DeviceSelector::Global,
        })
        .await
        .unwrap()
        .is_none());

    harness
        .storage()
        .set_job_status(&backup, netrun::JobStatus::Running)
        .await
        .unwrap();
    assert_eq!(automation.reset_status().await.unwrap(), 1);
    assert!(automation
        .run_job(&backup, options(json!({})))
        .await
        .is_ok());

    stop(automation, task).await;
}
