//! From YAML inventory to executed workflow.

use netrun::automation::{Automation, RunOptions};
use netrun::config::{load_inventory_from_directory, GlobalConfig, Platform, YamlLoader};
use netrun::results::{DeviceSelector, JobSelector, ResultSource};
use netrun::{EventBus, JobId};
use std::sync::Arc;
use tempfile::TempDir;

const INVENTORY: &str = r#"
devices:
  - id: r1
    ip_address: 10.0.0.1
    vendor: Cisco
  - id: r2
    ip_address: 10.0.0.2
    vendor: Cisco
pools:
  - id: cisco
    criteria:
      - property: vendor
        value: Cisco
services:
  - id: ping
    name: Ping
    driver: noop
    deviceless: true
  - id: show
    name: Show Version
    driver: noop
    command: "show version on {name} at {ip_address}"
workflows:
  - id: audit
    name: Audit
    jobs: [ping, show]
    pools: [cisco]
    edges:
      - source: ping
        destination: show
"#;

const GLOBAL: &str = r#"
scheduler:
  tick_interval_ms: 50
worker_pool_size: 4
log_retention: 10
"#;

async fn platform(dir: &TempDir) -> Platform {
    std::fs::write(dir.path().join("inventory.yaml"), INVENTORY).unwrap();
    let inventory = load_inventory_from_directory(dir.path()).unwrap();
    let global = YamlLoader::parse_global_config(GLOBAL).unwrap();
    Platform::build(&global, &inventory, Arc::new(EventBus::new()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_workflow_from_yaml_runs_on_pool() {
    let dir = TempDir::new().unwrap();
    let platform = platform(&dir).await;
    assert_eq!(platform.engine.worker_pool_size(), 4);
    assert_eq!(platform.engine.logs().retention(), 10);
    let (automation, task) = Automation::start(platform.scheduler).await.unwrap();

    let response = automation
        .run_job(&JobId::new("audit"), RunOptions::default())
        .await
        .unwrap();
    let outcome = response.outcome.unwrap();
    assert!(outcome.success);

    let show = automation
        .get_results(&ResultSource::Workflow {
            workflow: JobId::new("audit"),
            runtime: response.runtime.clone(),
            device: DeviceSelector::All,
            job: JobSelector::Job(JobId::new("show")),
        })
        .await
        .unwrap()
        .unwrap();
    let devices = show.as_object().unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(
        devices["r1"]["command"],
        "show version on r1 at 10.0.0.1"
    );

    let jobs = automation.get_job_list(&response.runtime).await.unwrap();
    let names: Vec<_> = jobs.iter().map(|(_, name)| name.as_str()).collect();
    assert!(names.contains(&"Ping"));
    assert!(names.contains(&"Show Version"));

    automation.scheduler().shutdown().await.unwrap();
    let _ = task.await;
}

#[tokio::test]
async fn test_configured_tasks_are_armed() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("tasks.yaml"),
        r#"
tasks:
  - id: hourly-audit
    job: audit
    frequency: 1
    frequency_unit: hours
  - id: parked
    job: ping
    frequency: 1
    frequency_unit: days
    active: false
"#,
    )
    .unwrap();
    let platform = platform(&dir).await;
    assert_eq!(platform.tasks.len(), 2);
    let (automation, task) = Automation::start(platform.scheduler).await.unwrap();

    let entries = automation.scheduler().list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id.as_str(), "hourly-audit");
    assert!(automation
        .next_run_time(&"parked".into())
        .await
        .unwrap()
        .is_none());

    automation.scheduler().shutdown().await.unwrap();
    let _ = task.await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_driver_substitutes_device_fields() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("inventory.yaml"),
        r#"
devices:
  - id: r1
    ip_address: 192.0.2.1
services:
  - id: echo
    name: Echo
    driver: command
    command: "echo {name} {ip_address}"
    devices: [r1]
"#,
    )
    .unwrap();
    let inventory = load_inventory_from_directory(dir.path()).unwrap();
    let platform = Platform::build(&GlobalConfig::default(), &inventory, Arc::new(EventBus::new()))
        .await
        .unwrap();

    let outcome = platform
        .engine
        .execute(&JobId::new("echo"), netrun::RunRequest::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(
        outcome.result["devices"]["r1"]["result"],
        "r1 192.0.2.1\n"
    );
}
