//! User-level operations over the catalog, run engine, scheduler and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::catalog::Catalog;
use crate::core::job::{Job, JobStatus, JobType};
use crate::core::targets;
use crate::core::task::Task;
use crate::core::trigger::Trigger;
use crate::core::types::{DeviceId, JobId, Runtime, TaskId};
use crate::core::workflow::{EdgeSubtype, WorkflowEdge};
use crate::execution::{RunEngine, RunOutcome, RunRequest};
use crate::results::{self, Comparison, ResultSource, RuntimeScope};
use crate::scheduler::{ScheduleInfo, Scheduler, SchedulerError, SchedulerHandle};
use crate::storage::{DeviceFilter, ResultFilter, Storage, StorageError};

use super::errors::{AutomationError, TASK_GONE};

/// Options of a manual run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Devices to run against instead of the job's own targets.
    #[serde(default)]
    pub targets: Option<Vec<DeviceId>>,
    #[serde(default)]
    pub start_points: Option<Vec<JobId>>,
    /// Hand the run to the scheduler and return immediately.
    #[serde(default)]
    pub asynchronous: bool,
}

/// Options of a workflow restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartOptions {
    /// Earlier run whose child results are reused.
    pub payload_version: Option<Runtime>,
    /// Names of the jobs whose results are reused.
    #[serde(default)]
    pub payloads_to_include: Vec<String>,
    #[serde(default)]
    pub start_points: Vec<JobId>,
    #[serde(default)]
    pub asynchronous: bool,
}

/// Answer to a run request: the serialized job and the runtime of its run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub job: Value,
    pub runtime: Runtime,
    /// Present for synchronous runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

/// Lifecycle action on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Pause,
    Resume,
    Delete,
}

/// Front door of the automation platform.
#[derive(Clone)]
pub struct Automation {
    engine: Arc<RunEngine>,
    scheduler: SchedulerHandle,
}

impl Automation {
    /// Wrap a running scheduler.
    pub fn new(engine: Arc<RunEngine>, scheduler: SchedulerHandle) -> Self {
        Self { engine, scheduler }
    }

    /// Recover from a previous crash, start the scheduler and re-arm the
    /// timers of active tasks that have none.
    pub async fn start(scheduler: Scheduler) -> Result<(Self, JoinHandle<()>), AutomationError> {
        let interrupted = scheduler.recover().await?;
        if !interrupted.is_empty() {
            warn!(runs = interrupted.len(), "recovered interrupted runs");
        }
        let engine = Arc::clone(scheduler.engine());
        let (handle, task) = scheduler.start().await;
        let automation = Self::new(engine, handle);
        automation.arm_active_tasks().await?;
        Ok((automation, task))
    }

    /// Bring timers in line with `is_active`: arm active tasks without a
    /// timer and pause running timers of inactive ones.
    async fn arm_active_tasks(&self) -> Result<(), AutomationError> {
        let armed: HashMap<_, _> = self
            .scheduler
            .list()
            .await?
            .into_iter()
            .map(|info| (info.id, info.paused))
            .collect();
        for task in self.storage().list_tasks().await? {
            match (task.is_active, armed.get(task.schedule_id())) {
                (true, None) => {
                    self.schedule(&task).await?;
                    info!(task = %task.id, "armed timer for active task");
                }
                (false, Some(false)) => {
                    self.scheduler.pause(task.schedule_id().clone()).await?;
                    info!(task = %task.id, "paused timer of inactive task");
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn engine(&self) -> &Arc<RunEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.engine.catalog()
    }

    fn storage(&self) -> &Arc<dyn Storage> {
        self.engine.storage()
    }

    async fn status(&self, job_id: &JobId) -> Result<JobStatus, AutomationError> {
        match self.storage().get_job(job_id).await {
            Ok(stored) => Ok(stored.status),
            Err(StorageError::NotFound(_)) => Ok(JobStatus::Idle),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialized job with its current status.
    pub async fn serialize_job(&self, job_id: &JobId) -> Result<Value, AutomationError> {
        let job = self.catalog().job(job_id)?;
        Ok(job.serialize(self.status(job_id).await?))
    }

    // Runs

    /// Run a job now.
    ///
    /// Fails with "{type} is already running." without dispatching anything
    /// when the job is running.
    pub async fn run_job(
        &self,
        job_id: &JobId,
        options: RunOptions,
    ) -> Result<RunResponse, AutomationError> {
        let job = self.catalog().job(job_id)?;
        if self.status(job_id).await? == JobStatus::Running {
            return Err(AutomationError::AlreadyRunning(format!(
                "{} is already running.",
                job.job_type()
            )));
        }

        let runtime = Runtime::now();
        let mut request = RunRequest::new()
            .with_runtime(runtime.clone())
            .with_payload(options.payload);
        if let Some(targets) = options.targets {
            request = request.with_targets(targets);
        }
        if let Some(start_points) = options.start_points {
            request = request.with_start_points(start_points);
        }

        if options.asynchronous {
            self.scheduler.run_now(job_id.clone(), request).await?;
            info!(job = %job_id, runtime = %runtime, "run dispatched");
            return Ok(RunResponse {
                job: self.serialize_job(job_id).await?,
                runtime,
                outcome: None,
            });
        }

        let outcome = self.engine.execute(job_id, request).await?;
        Ok(RunResponse {
            job: self.serialize_job(job_id).await?,
            runtime,
            outcome: Some(outcome),
        })
    }

    /// Run a workflow again, reusing selected child results of an earlier run.
    pub async fn restart_workflow(
        &self,
        workflow_id: &JobId,
        options: RestartOptions,
    ) -> Result<RunResponse, AutomationError> {
        let job = self.catalog().job(workflow_id)?;
        if job.job_type() != JobType::Workflow {
            return Err(AutomationError::InvalidInput(format!(
                "job '{}' is not a workflow",
                workflow_id
            )));
        }
        if self.status(workflow_id).await? == JobStatus::Running {
            return Err(AutomationError::AlreadyRunning(
                "Workflow is already running.".to_string(),
            ));
        }

        let payload = match &options.payload_version {
            Some(version) => {
                self.reusable_results(workflow_id, version, &options.payloads_to_include)
                    .await?
            }
            None => Map::new(),
        };
        let start_points = (!options.start_points.is_empty()).then_some(options.start_points);
        self.run_job(
            workflow_id,
            RunOptions {
                payload,
                targets: None,
                start_points,
                asynchronous: options.asynchronous,
            },
        )
        .await
    }

    /// Child results of a workflow run, restricted to the named jobs.
    async fn reusable_results(
        &self,
        workflow_id: &JobId,
        version: &Runtime,
        include: &[String],
    ) -> Result<Map<String, Value>, AutomationError> {
        let stored = self
            .storage()
            .list_results(
                &ResultFilter::new()
                    .runtime(version.clone())
                    .job(workflow_id.clone())
                    .device(DeviceFilter::Global),
            )
            .await?;
        let Some(previous) = stored.into_iter().next() else {
            return Err(AutomationError::NotFound(format!(
                "no run of {} at {}",
                workflow_id, version
            )));
        };
        let mut payload = Map::new();
        if let Some(results) = previous.result.get("results").and_then(Value::as_object) {
            for name in include {
                if let Some(result) = results.get(name) {
                    payload.insert(name.clone(), result.clone());
                }
            }
        }
        Ok(payload)
    }

    // Tasks

    async fn schedule(&self, task: &Task) -> Result<ScheduleInfo, AutomationError> {
        let trigger = Trigger::from_task(task, Utc::now())?;
        Ok(self
            .scheduler
            .register(task.schedule_id().clone(), task.id.clone(), trigger)
            .await?)
    }

    async fn unschedule(&self, task: &Task) -> Result<(), AutomationError> {
        match self.scheduler.remove(task.schedule_id().clone()).await {
            Ok(()) | Err(SchedulerError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Task, AutomationError> {
        match self.storage().get_task(task_id).await {
            Ok(task) => Ok(task),
            Err(StorageError::NotFound(_)) => Err(AutomationError::NotFound(TASK_GONE.into())),
            Err(e) => Err(e.into()),
        }
    }

    fn validate_task(&self, task: &Task) -> Result<(), AutomationError> {
        self.catalog().job(&task.job)?;
        Trigger::from_task(task, Utc::now())?;
        Ok(())
    }

    /// Create a task, arming its timer when it is active.
    pub async fn create_task(&self, task: Task) -> Result<Task, AutomationError> {
        self.validate_task(&task)?;
        if task.is_active {
            self.schedule(&task).await?;
        }
        if let Err(e) = self.storage().save_task(task.clone()).await {
            if task.is_active {
                self.unschedule(&task).await?;
            }
            return Err(e.into());
        }
        info!(task = %task.id, schedule = %task.schedule_id(), "task created");
        Ok(task)
    }

    /// Replace a task's definition, keeping its schedule id.
    pub async fn update_task(&self, task: Task) -> Result<Task, AutomationError> {
        let previous = self.get_task(&task.id).await?;
        let task = task.with_schedule_id(previous.schedule_id().clone());
        self.validate_task(&task)?;

        if task.is_active {
            self.schedule(&task).await?;
        } else {
            self.unschedule(&task).await?;
        }
        if let Err(e) = self.storage().update_task(task.clone()).await {
            self.restore_timer(&previous).await;
            return Err(e.into());
        }
        Ok(task)
    }

    /// Put a task's timer back the way its stored record says.
    async fn restore_timer(&self, task: &Task) {
        let restored = if task.is_active {
            self.schedule(task).await.map(|_| ())
        } else {
            self.unschedule(task).await
        };
        if let Err(e) = restored {
            warn!(task = %task.id, error = %e, "failed to restore task timer");
        }
    }

    /// Pause, resume or delete a task.
    pub async fn task_action(
        &self,
        task_id: &TaskId,
        action: TaskAction,
    ) -> Result<Option<Task>, AutomationError> {
        let previous = self.get_task(task_id).await?;
        match action {
            TaskAction::Pause => {
                self.scheduler.pause(previous.schedule_id().clone()).await?;
                let mut task = previous.clone();
                task.is_active = false;
                if let Err(e) = self.storage().update_task(task.clone()).await {
                    self.restore_timer(&previous).await;
                    return Err(e.into());
                }
                Ok(Some(task))
            }
            TaskAction::Resume => {
                match self.scheduler.resume(previous.schedule_id().clone()).await {
                    Ok(_) => {}
                    Err(SchedulerError::NotFound(_)) => {
                        self.schedule(&previous).await?;
                    }
                    Err(e) => return Err(e.into()),
                }
                let mut task = previous.clone();
                task.is_active = true;
                if let Err(e) = self.storage().update_task(task.clone()).await {
                    if let Err(pause_error) =
                        self.scheduler.pause(previous.schedule_id().clone()).await
                    {
                        warn!(task = %task_id, error = %pause_error, "failed to roll back resume");
                    }
                    return Err(e.into());
                }
                Ok(Some(task))
            }
            TaskAction::Delete => {
                self.unschedule(&previous).await?;
                if let Err(e) = self.storage().delete_task(task_id).await {
                    self.restore_timer(&previous).await;
                    return Err(e.into());
                }
                info!(task = %task_id, "task deleted");
                Ok(None)
            }
        }
    }

    /// Next fire of an active task, `None` when paused or exhausted.
    pub async fn next_run_time(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<DateTime<Utc>>, AutomationError> {
        let task = self.get_task(task_id).await?;
        match self.scheduler.get(task.schedule_id().clone()).await {
            Ok(info) if !info.paused => Ok(info.next_run_time),
            Ok(_) | Err(SchedulerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Time left before the next fire, as "{d} days, {h}h:{m}m:{s}s".
    pub async fn time_before_next_run(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<String>, AutomationError> {
        Ok(self
            .next_run_time(task_id)
            .await?
            .map(|next| format_countdown(next - Utc::now())))
    }

    /// Devices a task would run against right now.
    pub async fn compute_targets(
        &self,
        task_id: &TaskId,
    ) -> Result<BTreeSet<DeviceId>, AutomationError> {
        let task = self.get_task(task_id).await?;
        Ok(targets::resolve(self.catalog(), &task.devices, &task.pools)?)
    }

    // Scheduler

    pub async fn pause_all(&self) -> Result<(), AutomationError> {
        Ok(self.scheduler.pause_all().await?)
    }

    pub async fn resume_all(&self) -> Result<(), AutomationError> {
        Ok(self.scheduler.resume_all().await?)
    }

    // Results

    pub async fn get_results(&self, source: &ResultSource) -> Result<Option<Value>, AutomationError> {
        Ok(results::get_results(self.storage().as_ref(), source).await?)
    }

    pub async fn compare_results(
        &self,
        first: &ResultSource,
        second: &ResultSource,
    ) -> Result<Comparison, AutomationError> {
        Ok(results::compare_results(self.storage().as_ref(), first, second).await?)
    }

    pub async fn get_runtimes(&self, scope: &RuntimeScope) -> Result<Vec<Runtime>, AutomationError> {
        Ok(results::get_runtimes(self.storage().as_ref(), scope).await?)
    }

    pub async fn get_device_list(
        &self,
        runtime: &Runtime,
        job: Option<&JobId>,
    ) -> Result<Vec<(String, String)>, AutomationError> {
        Ok(results::get_device_list(self.storage().as_ref(), runtime, job).await?)
    }

    pub async fn get_job_list(
        &self,
        runtime: &Runtime,
    ) -> Result<Vec<(String, String)>, AutomationError> {
        Ok(results::get_job_list(self.storage().as_ref(), runtime).await?)
    }

    /// Log lines of a run, with whether the job is still running.
    pub async fn get_job_logs(
        &self,
        job_id: &JobId,
        runtime: &Runtime,
    ) -> Result<(Vec<String>, bool), AutomationError> {
        let running = self.status(job_id).await? == JobStatus::Running;
        Ok((self.engine.logs().lines(runtime), running))
    }

    /// Delete every result of a job and the log buffers of its runs.
    pub async fn clear_results(&self, job_id: &JobId) -> Result<usize, AutomationError> {
        let runtimes = results::get_runtimes(
            self.storage().as_ref(),
            &RuntimeScope::Job(job_id.clone()),
        )
        .await?;
        let removed = self.storage().clear_results(job_id).await?;
        for runtime in runtimes {
            self.engine.logs().clear(&runtime);
        }
        info!(job = %job_id, removed, "cleared results");
        Ok(removed)
    }

    /// Set every job back to Idle.
    pub async fn reset_status(&self) -> Result<usize, AutomationError> {
        Ok(self.storage().reset_job_statuses().await?)
    }

    // Workflow editing

    pub fn add_jobs_to_workflow(
        &self,
        workflow_id: &JobId,
        jobs: &[JobId],
    ) -> Result<Vec<JobId>, AutomationError> {
        Ok(self.catalog().add_jobs_to_workflow(workflow_id, jobs)?)
    }

    pub fn add_edge(
        &self,
        workflow_id: &JobId,
        subtype: EdgeSubtype,
        source: &JobId,
        destination: &JobId,
    ) -> Result<WorkflowEdge, AutomationError> {
        Ok(self
            .catalog()
            .add_edge(workflow_id, subtype, source, destination)?)
    }

    pub fn delete_edge(
        &self,
        workflow_id: &JobId,
        edge_name: &str,
    ) -> Result<WorkflowEdge, AutomationError> {
        Ok(self.catalog().delete_edge(workflow_id, edge_name)?)
    }

    /// Remove a job from a workflow with every edge touching it.
    pub fn delete_node(
        &self,
        workflow_id: &JobId,
        job_id: &JobId,
    ) -> Result<Vec<WorkflowEdge>, AutomationError> {
        Ok(self.catalog().delete_node(workflow_id, job_id)?)
    }

    pub fn save_positions(
        &self,
        workflow_id: &JobId,
        positions: &HashMap<JobId, (f64, f64)>,
    ) -> Result<DateTime<Utc>, AutomationError> {
        Ok(self.catalog().save_positions(workflow_id, positions)?)
    }

    pub fn duplicate_workflow(
        &self,
        workflow_id: &JobId,
        new_id: &JobId,
        new_name: &str,
    ) -> Result<Job, AutomationError> {
        Ok(self
            .catalog()
            .duplicate_workflow(workflow_id, new_id.clone(), new_name)?)
    }
}

/// Format a duration as "{d} days, {h}h:{m}m:{s}s". Negative spans are zero.
pub fn format_countdown(delta: chrono::Duration) -> String {
    let total = delta.num_seconds().max(0);
    let (days, rest) = (total / 86_400, total % 86_400);
    format!(
        "{} days, {}h:{}m:{}s",
        days,
        rest / 3600,
        (rest % 3600) / 60,
        rest % 60
    )
}

/// Serialize a controller answer, or its error as an [`ErrorResponse`](super::ErrorResponse).
pub fn to_json<T: Serialize>(result: Result<T, AutomationError>) -> Value {
    match result {
        Ok(value) => serde_json::to_value(value).unwrap_or(Value::Null),
        Err(e) => serde_json::to_value(e.to_response()).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trigger::{FrequencyUnit, TriggerSpec};
    use crate::scheduler::InMemoryScheduleStore;
    use crate::testing::TestHarness;
    use std::time::Duration;

    async fn automation(harness: &TestHarness) -> (Automation, JoinHandle<()>) {
        let scheduler = Scheduler::new(
            Arc::clone(harness.engine()),
            Arc::new(InMemoryScheduleStore::new()),
        )
        .with_tick_interval(Duration::from_millis(50));
        Automation::start(scheduler).await.unwrap()
    }

    fn hourly(id: &str) -> Task {
        Task::new(id, id.to_uppercase(), "backup", TriggerSpec::every(1, FrequencyUnit::Hours))
            .with_devices(["r1"])
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(
            format_countdown(chrono::Duration::seconds(90_061)),
            "1 days, 1h:1m:1s"
        );
        assert_eq!(format_countdown(chrono::Duration::seconds(-5)), "0 days, 0h:0m:0s");
    }

    #[tokio::test]
    async fn test_run_job_sync_and_already_running() {
        let harness = TestHarness::new().with_devices(["r1"]);
        harness.add_service("backup", false);
        let (automation, task) = automation(&harness).await;

        let response = automation
            .run_job(
                &"backup".into(),
                RunOptions {
                    targets: Some(vec!["r1".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(response.outcome.as_ref().is_some_and(|o| o.success));
        assert_eq!(response.job["status"], "Idle");

        harness
            .storage()
            .set_job_status(&"backup".into(), JobStatus::Running)
            .await
            .unwrap();
        let err = automation
            .run_job(&"backup".into(), RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Service is already running.");
        assert_eq!(harness.driver().calls().len(), 1);
        assert_eq!(to_json::<RunResponse>(Err(err))["code"], "ALREADY_RUNNING");

        automation.scheduler().shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_run_job_async_returns_runtime_first() {
        let harness = TestHarness::new().with_devices(["r1"]);
        harness.add_service("backup", false);
        let (automation, task) = automation(&harness).await;

        let response = automation
            .run_job(
                &"backup".into(),
                RunOptions {
                    targets: Some(vec!["r1".into()]),
                    asynchronous: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(response.outcome.is_none());

        automation.scheduler().shutdown().await.unwrap();
        let _ = task.await;
        let run = harness.storage().get_run(&response.runtime).await.unwrap();
        assert_eq!(run.success, Some(true));
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let harness = TestHarness::new().with_devices(["r1"]);
        harness.add_service("backup", false);
        let (automation, task) = automation(&harness).await;

        let created = automation.create_task(hourly("nightly").active()).await.unwrap();
        let next = automation.next_run_time(&created.id).await.unwrap();
        assert!(next.is_some());
        let countdown = automation.time_before_next_run(&created.id).await.unwrap();
        assert!(countdown.is_some_and(|c| c.starts_with("0 days, 0h:59m") || c.starts_with("0 days, 1h:0m")));

        let paused = automation
            .task_action(&created.id, TaskAction::Pause)
            .await
            .unwrap()
            .unwrap();
        assert!(!paused.is_active);
        assert_eq!(automation.next_run_time(&created.id).await.unwrap(), None);

        let resumed = automation
            .task_action(&created.id, TaskAction::Resume)
            .await
            .unwrap()
            .unwrap();
        assert!(resumed.is_active);
        assert!(automation.next_run_time(&created.id).await.unwrap().is_some());

        assert_eq!(
            automation.compute_targets(&created.id).await.unwrap(),
            BTreeSet::from([DeviceId::new("r1")])
        );

        automation
            .task_action(&created.id, TaskAction::Delete)
            .await
            .unwrap();
        assert!(automation.scheduler().list().await.unwrap().is_empty());
        let gone = automation
            .task_action(&created.id, TaskAction::Pause)
            .await
            .unwrap_err();
        assert_eq!(gone.to_string(), TASK_GONE);

        automation.scheduler().shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_create_task_rolls_back_timer_on_conflict() {
        let harness = TestHarness::new().with_devices(["r1"]);
        harness.add_service("backup", false);
        let (automation, task) = automation(&harness).await;

        automation.create_task(hourly("nightly")).await.unwrap();
        let duplicate = hourly("nightly").active();
        let err = automation.create_task(duplicate).await.unwrap_err();

        assert!(matches!(err, AutomationError::PersistenceConflict(_)));
        assert!(automation.scheduler().list().await.unwrap().is_empty());

        automation.scheduler().shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_update_task_keeps_schedule_id() {
        let harness = TestHarness::new().with_devices(["r1"]);
        harness.add_service("backup", false);
        let (automation, task) = automation(&harness).await;

        let created = automation.create_task(hourly("nightly").active()).await.unwrap();
        let mut changed = hourly("nightly").active();
        changed.trigger = TriggerSpec::every(2, FrequencyUnit::Hours);
        let updated = automation.update_task(changed).await.unwrap();

        assert_eq!(updated.schedule_id(), created.schedule_id());
        let entries = automation.scheduler().list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(&entries[0].id, created.schedule_id());

        automation.scheduler().shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_restart_reuses_selected_results() {
        let harness = TestHarness::new();
        harness.add_service("a", true);
        harness.add_service("b", true);
        harness.add_workflow("wf", &["a", "b"], &[(EdgeSubtype::Success, "a", "b")]);
        let (automation, task) = automation(&harness).await;

        let first = automation
            .run_job(&"wf".into(), RunOptions::default())
            .await
            .unwrap();
        let restarted = automation
            .restart_workflow(
                &"wf".into(),
                RestartOptions {
                    payload_version: Some(first.runtime.clone()),
                    payloads_to_include: vec!["A".into()],
                    start_points: vec!["b".into()],
                    asynchronous: false,
                },
            )
            .await
            .unwrap();

        let outcome = restarted.outcome.unwrap();
        assert!(outcome.success);
        assert_eq!(harness.driver().calls_for(&"a".into()).len(), 1);
        assert_eq!(harness.driver().calls_for(&"b".into()).len(), 2);
        assert!(outcome.result["results"].get("A").is_some());

        automation.scheduler().shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_restart_running_workflow() {
        let harness = TestHarness::new();
        harness.add_service("a", true);
        harness.add_workflow("wf", &["a"], &[]);
        let (automation, task) = automation(&harness).await;
        automation
            .run_job(&"wf".into(), RunOptions::default())
            .await
            .unwrap();
        harness
            .storage()
            .set_job_status(&"wf".into(), JobStatus::Running)
            .await
            .unwrap();

        let err = automation
            .restart_workflow(&"wf".into(), RestartOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Workflow is already running.");

        automation.scheduler().shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_start_arms_active_tasks_and_recovers() {
        let harness = TestHarness::new().with_devices(["r1"]);
        harness.add_service("backup", false);
        harness
            .storage()
            .save_task(hourly("nightly").active())
            .await
            .unwrap();
        harness
            .storage()
            .save_task(hourly("idle"))
            .await
            .unwrap();

        let (automation, task) = automation(&harness).await;
        let entries = automation.scheduler().list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task_id, TaskId::new("nightly"));

        automation.scheduler().shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_clear_results_and_logs() {
        let harness = TestHarness::new().with_devices(["r1"]);
        harness.add_service("backup", false);
        let (automation, task) = automation(&harness).await;

        let response = automation
            .run_job(
                &"backup".into(),
                RunOptions {
                    targets: Some(vec!["r1".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let (lines, running) = automation
            .get_job_logs(&"backup".into(), &response.runtime)
            .await
            .unwrap();
        assert!(!lines.is_empty());
        assert!(!running);

        assert_eq!(automation.clear_results(&"backup".into()).await.unwrap(), 2);
        let (lines, _) = automation
            .get_job_logs(&"backup".into(), &response.runtime)
            .await
            .unwrap();
        assert!(lines.is_empty());

        automation.scheduler().shutdown().await.unwrap();
        let _ = task.await;
    }
}
