//! Testing utilities for users of the netrun library.
//!
//! This module provides helpers for testing jobs and workflows without real
//! devices:
//!
//! - [`ScriptedDriver`]: A device driver whose outcomes are scripted per job
//!   or per device, and which records every call
//! - [`TestHarness`]: A catalog, in-memory storage and run engine wired to a
//!   scripted driver

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::core::catalog::Catalog;
use crate::core::device::Device;
use crate::core::job::{Job, Service};
use crate::core::types::{DeviceId, JobId, Runtime};
use crate::core::workflow::{EdgeSubtype, WorkflowEdge};
use crate::execution::{
    DeviceDriver, DriverError, DriverOutput, DriverRegistry, DriverRequest, EngineError,
    RunEngine, RunOutcome, RunRequest,
};
use crate::storage::{InMemoryStorage, Storage};

/// Name the scripted driver registers under.
pub const SCRIPTED_DRIVER: &str = "scripted";

/// One recorded driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub job_id: JobId,
    pub device: Option<DeviceId>,
    pub runtime: Runtime,
}

#[derive(Default)]
struct Script {
    failing_devices: HashSet<DeviceId>,
    erroring_devices: HashSet<DeviceId>,
    failing_jobs: HashSet<JobId>,
    fail_times: HashMap<JobId, u32>,
    delay: Option<Duration>,
    calls: Vec<DriverCall>,
}

/// A driver with scripted outcomes.
///
/// Every call succeeds unless a rule says otherwise. Rules can be changed
/// while the driver is shared with an engine.
///
/// # Example
///
/// ```
/// use netrun::testing::ScriptedDriver;
///
/// let driver = ScriptedDriver::new();
/// driver.fail_device("r2");
/// driver.fail_job_times("flaky", 1);
/// assert!(driver.calls().is_empty());
/// ```
#[derive(Default)]
pub struct ScriptedDriver {
    script: Mutex<Script>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report failure for every call on this device.
    pub fn fail_device(&self, device: impl Into<DeviceId>) {
        self.script().failing_devices.insert(device.into());
    }

    /// Raise a driver error for every call on this device.
    pub fn error_device(&self, device: impl Into<DeviceId>) {
        self.script().erroring_devices.insert(device.into());
    }

    /// Report failure for every call made by this job.
    pub fn fail_job(&self, job: impl Into<JobId>) {
        self.script().failing_jobs.insert(job.into());
    }

    /// Fail the first `times` calls made by this job, then succeed.
    pub fn fail_job_times(&self, job: impl Into<JobId>, times: u32) {
        self.script().fail_times.insert(job.into(), times);
    }

    /// Sleep this long in every call.
    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = Some(delay);
    }

    /// Remove every rule, keeping recorded calls.
    pub fn reset_rules(&self) {
        let mut script = self.script();
        script.failing_devices.clear();
        script.erroring_devices.clear();
        script.failing_jobs.clear();
        script.fail_times.clear();
        script.delay = None;
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.script().calls.clone()
    }

    /// Calls made so far by one job.
    pub fn calls_for(&self, job: &JobId) -> Vec<DriverCall> {
        self.script()
            .calls
            .iter()
            .filter(|call| &call.job_id == job)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    fn name(&self) -> &str {
        SCRIPTED_DRIVER
    }

    async fn execute(&self, request: &DriverRequest) -> Result<DriverOutput, DriverError> {
        let device = request.device.as_ref().map(|d| d.id.clone());
        let (delay, errored, failed) = {
            let mut script = self.script();
            script.calls.push(DriverCall {
                job_id: request.job_id.clone(),
                device: device.clone(),
                runtime: request.runtime.clone(),
            });
            let errored = device
                .as_ref()
                .is_some_and(|d| script.erroring_devices.contains(d));
            let mut failed = script.failing_jobs.contains(&request.job_id)
                || device
                    .as_ref()
                    .is_some_and(|d| script.failing_devices.contains(d));
            if let Some(remaining) = script.fail_times.get_mut(&request.job_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    failed = true;
                }
            }
            (script.delay, errored, failed)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if errored {
            let name = request
                .device
                .as_ref()
                .map(|d| d.name.clone())
                .unwrap_or_default();
            return Err(DriverError::Unreachable(name));
        }

        let output = json!({
            "job": request.job_name,
            "device": request.device.as_ref().map(|d| d.name.clone()),
            "payload_keys": request.payload.keys().collect::<Vec<_>>(),
        });
        Ok(if failed {
            DriverOutput::failure(output)
        } else {
            DriverOutput::success(output)
        })
    }
}

/// A test harness for running jobs against scripted devices.
///
/// # Example
///
/// ```ignore
/// use netrun::testing::TestHarness;
///
/// let harness = TestHarness::new().with_devices(["r1", "r2"]);
/// harness.add_service("backup", false);
/// harness.driver().fail_device("r2");
///
/// let outcome = harness.execute_and_assert_failure("backup").await;
/// ```
pub struct TestHarness {
    engine: Arc<RunEngine>,
    driver: Arc<ScriptedDriver>,
    storage: Arc<InMemoryStorage>,
}

impl TestHarness {
    /// Create a harness with an empty catalog.
    pub fn new() -> Self {
        Self::with_worker_pool(4)
    }

    /// Create a harness with the given number of driver slots.
    pub fn with_worker_pool(size: usize) -> Self {
        let driver = Arc::new(ScriptedDriver::new());
        let storage = Arc::new(InMemoryStorage::new());
        let mut drivers = DriverRegistry::new();
        drivers.register(driver.clone());
        let engine = RunEngine::new(
            Arc::new(Catalog::new()),
            storage.clone() as Arc<dyn Storage>,
            drivers,
        )
        .with_worker_pool(size);
        Self {
            engine: Arc::new(engine),
            driver,
            storage,
        }
    }

    /// Add devices whose id and name are the given strings.
    pub fn with_devices<I, S>(self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in devices {
            let id = id.into();
            self.add_device(Device::new(id.clone(), id));
        }
        self
    }

    pub fn add_device(&self, device: Device) {
        self.catalog()
            .insert_device(device)
            .expect("failed to add device");
    }

    /// Add a scripted service whose name is its id in upper case.
    pub fn add_service(&self, id: &str, deviceless: bool) -> Job {
        let mut service = Service::new(SCRIPTED_DRIVER);
        service.deviceless = deviceless;
        let job = Job::service(id, id.to_uppercase(), service);
        self.catalog()
            .add_job(job.clone())
            .expect("failed to add service");
        job
    }

    /// Add a workflow with the given members and `(subtype, source, destination)` edges.
    pub fn add_workflow(
        &self,
        id: &str,
        members: &[&str],
        edges: &[(EdgeSubtype, &str, &str)],
    ) -> Vec<WorkflowEdge> {
        let workflow_id = JobId::new(id);
        self.catalog()
            .add_job(Job::workflow(id, id.to_uppercase()))
            .expect("failed to add workflow");
        let members: Vec<JobId> = members.iter().map(|m| JobId::new(*m)).collect();
        self.catalog()
            .add_jobs_to_workflow(&workflow_id, &members)
            .expect("failed to add members");
        edges
            .iter()
            .map(|(subtype, source, destination)| {
                self.catalog()
                    .add_edge(
                        &workflow_id,
                        *subtype,
                        &JobId::new(*source),
                        &JobId::new(*destination),
                    )
                    .expect("failed to add edge")
            })
            .collect()
    }

    pub fn engine(&self) -> &Arc<RunEngine> {
        &self.engine
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.engine.catalog()
    }

    pub fn storage(&self) -> &Arc<InMemoryStorage> {
        &self.storage
    }

    pub fn driver(&self) -> &Arc<ScriptedDriver> {
        &self.driver
    }

    /// Run a job with the given request.
    pub async fn run(&self, job: &str, request: RunRequest) -> Result<RunOutcome, EngineError> {
        self.engine.execute(&JobId::new(job), request).await
    }

    /// Run a job with default parameters.
    pub async fn execute(&self, job: &str) -> Result<RunOutcome, EngineError> {
        self.run(job, RunRequest::new()).await
    }

    /// Run and assert success.
    pub async fn execute_and_assert_success(&self, job: &str) -> RunOutcome {
        let outcome = self.execute(job).await.expect("run aborted");
        assert!(
            outcome.success,
            "Expected {} to succeed, but it failed: {}",
            job, outcome.result
        );
        outcome
    }

    /// Run and assert failure.
    pub async fn execute_and_assert_failure(&self, job: &str) -> RunOutcome {
        let outcome = self.execute(job).await.expect("run aborted");
        assert!(!outcome.success, "Expected {} to fail, but it succeeded", job);
        outcome
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Global result payload of a run, if one was written.
pub async fn global_result(storage: &dyn Storage, job: &JobId, runtime: &Runtime) -> Option<Value> {
    storage
        .list_results(
            &crate::storage::ResultFilter::new()
                .runtime(runtime.clone())
                .job(job.clone())
                .device(crate::storage::DeviceFilter::Global),
        )
        .await
        .ok()?
        .into_iter()
        .next()
        .map(|result| result.result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::NodeState;

    #[tokio::test]
    async fn test_scripted_driver_records_calls() {
        let harness = TestHarness::new().with_devices(["r1", "r2"]);
        harness.add_service("show", false);

        let outcome = harness
            .run("show", RunRequest::new().with_targets(["r1", "r2"]))
            .await
            .unwrap();

        assert!(outcome.success);
        let calls = harness.driver().calls_for(&"show".into());
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.runtime == outcome.runtime));
    }

    #[tokio::test]
    async fn test_fail_times_then_succeed() {
        let harness = TestHarness::new();
        harness.add_service("flaky", true);
        harness.driver().fail_job_times("flaky", 1);

        harness.execute_and_assert_failure("flaky").await;
        harness.execute_and_assert_success("flaky").await;
        assert_eq!(harness.driver().calls().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_rules() {
        let harness = TestHarness::new();
        harness.add_service("job", true);
        harness.driver().fail_job("job");
        harness.execute_and_assert_failure("job").await;

        harness.driver().reset_rules();
        harness.execute_and_assert_success("job").await;
    }

    #[tokio::test]
    async fn test_harness_workflow() {
        let harness = TestHarness::new();
        harness.add_service("a", true);
        harness.add_service("b", true);
        harness.add_workflow("wf", &["a", "b"], &[(EdgeSubtype::Success, "a", "b")]);

        let outcome = harness.execute_and_assert_success("wf").await;
        assert_eq!(outcome.state(&"b".into()), Some(NodeState::Succeeded));

        let global = global_result(harness.storage().as_ref(), &"wf".into(), &outcome.runtime)
            .await
            .unwrap();
        assert_eq!(global["states"]["B"], "Succeeded");
        // B saw A's result in its payload.
        assert_eq!(global["results"]["B"]["result"]["payload_keys"][0], "A");
    }
}
