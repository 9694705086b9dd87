//! Run engine.
//!
//! The `RunEngine` executes one job at one runtime. A service fans out to
//! its target devices through a driver; a workflow walks its graph of child
//! jobs, following the edges that match each child's outcome. Every run
//! writes its per-device results plus one global result, and holds the job's
//! Running status for its whole duration.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::core::catalog::{Catalog, CatalogError};
use crate::core::device::Device;
use crate::core::job::{Job, JobKind, JobStatus, JobType, Service};
use crate::core::targets;
use crate::core::types::{DeviceId, JobId, Runtime, TaskId};
use crate::core::workflow::{Workflow, WorkflowError};
use crate::events::{Event, EventBus, EventHandler};
use crate::storage::{Storage, StorageError, StoredJob, StoredResult, StoredRun};

use super::driver::{DeviceDriver, DriverError, DriverOutput, DriverRegistry, DriverRequest};
use super::logs::RunLogs;

/// Default number of concurrent driver calls.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 50;

/// Errors that abort a run.
///
/// Device-level failures never show up here; they are recorded as failed
/// results.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The job is already running.
    #[error("{job_type} is already running.")]
    AlreadyRunning { job_id: JobId, job_type: JobType },

    /// The workflow graph or the requested start points are malformed.
    #[error("invalid workflow: {0}")]
    Structural(#[from] WorkflowError),

    /// A job, device or pool could not be resolved.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A service names a driver that is not registered.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Persisting run state failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// State of one member job during a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Parameters of a single run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Runtime to use; generated when absent.
    pub runtime: Option<Runtime>,
    /// Top-level runtime, for child runs inside a workflow.
    pub parent_runtime: Option<Runtime>,
    /// Devices to run against; resolved from the job when absent.
    pub targets: Option<BTreeSet<DeviceId>>,
    /// Payload handed to drivers. For a workflow, entries keyed by a member
    /// job's name are reused as that job's result.
    pub payload: Map<String, Value>,
    /// Workflow jobs to start from; the graph roots when absent.
    pub start_points: Option<Vec<JobId>>,
    /// Task that fired the run.
    pub task_id: Option<TaskId>,
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_targets<I, D>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DeviceId>,
    {
        self.targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_start_points<I, J>(mut self, start_points: I) -> Self
    where
        I: IntoIterator<Item = J>,
        J: Into<JobId>,
    {
        self.start_points = Some(start_points.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub job_id: JobId,
    pub job_name: String,
    pub job_type: JobType,
    pub runtime: Runtime,
    pub parent_runtime: Option<Runtime>,
    pub success: bool,
    /// The global result payload.
    pub result: Value,
    /// Final state of each member job; empty for services.
    pub states: BTreeMap<JobId, NodeState>,
}

impl RunOutcome {
    pub fn state(&self, job: &JobId) -> Option<NodeState> {
        self.states.get(job).copied()
    }
}

type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<RunOutcome, EngineError>> + Send + 'a>>;

/// Executes jobs against devices and records their results.
pub struct RunEngine {
    catalog: Arc<Catalog>,
    storage: Arc<dyn Storage>,
    drivers: Arc<DriverRegistry>,
    logs: RunLogs,
    event_bus: Arc<EventBus>,
    workers: Arc<Semaphore>,
    pool_size: usize,
}

impl RunEngine {
    /// Create an engine with the default worker pool.
    pub fn new(catalog: Arc<Catalog>, storage: Arc<dyn Storage>, drivers: DriverRegistry) -> Self {
        Self {
            catalog,
            storage,
            drivers: Arc::new(drivers),
            logs: RunLogs::new(),
            event_bus: Arc::new(EventBus::new()),
            workers: Arc::new(Semaphore::new(DEFAULT_WORKER_POOL_SIZE)),
            pool_size: DEFAULT_WORKER_POOL_SIZE,
        }
    }

    /// Bound the number of concurrent driver calls.
    pub fn with_worker_pool(mut self, size: usize) -> Self {
        let size = size.max(1);
        self.workers = Arc::new(Semaphore::new(size));
        self.pool_size = size;
        self
    }

    /// Keep the logs of at most `retention` finished top-level runs.
    pub fn with_log_retention(mut self, retention: usize) -> Self {
        self.logs = RunLogs::with_retention(retention);
        self
    }

    /// Emit lifecycle events on a shared bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn logs(&self) -> &RunLogs {
        &self.logs
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn worker_pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run a job to completion.
    ///
    /// Fails with [`EngineError::AlreadyRunning`] without side effects if the
    /// job is Running. Structural problems are reported before any device
    /// work starts.
    pub async fn execute(
        &self,
        job_id: &JobId,
        request: RunRequest,
    ) -> Result<RunOutcome, EngineError> {
        self.run(job_id.clone(), request).await
    }

    fn run(&self, job_id: JobId, request: RunRequest) -> RunFuture<'_> {
        Box::pin(async move {
            let job = self.catalog.job(&job_id)?;
            self.check_structure(&job, request.start_points.as_deref())?;
            let targets = match &request.targets {
                Some(targets) => targets.clone(),
                None => targets::resolve(&self.catalog, &job.devices, &job.pools)?,
            };

            self.storage
                .save_job(StoredJob::new(job.id.clone(), &job.name, job.job_type()))
                .await?;
            if !self.storage.begin_job_run(&job.id).await? {
                return Err(EngineError::AlreadyRunning {
                    job_id: job.id.clone(),
                    job_type: job.job_type(),
                });
            }

            let outcome = self.run_guarded(&job, request, targets).await;

            if let Err(e) = self.storage.set_job_status(&job.id, JobStatus::Idle).await {
                warn!(job = %job.id, error = %e, "failed to reset job status");
            }
            outcome
        })
    }

    fn check_structure(&self, job: &Job, start_points: Option<&[JobId]>) -> Result<(), EngineError> {
        self.check_job(job, start_points, &mut HashSet::new())
    }

    /// Nested workflows are checked with their own roots, as they run.
    fn check_job(
        &self,
        job: &Job,
        start_points: Option<&[JobId]>,
        visited: &mut HashSet<JobId>,
    ) -> Result<(), EngineError> {
        if !visited.insert(job.id.clone()) {
            return Ok(());
        }
        match &job.kind {
            JobKind::Service(service) => {
                self.drivers.get(&service.driver)?;
            }
            JobKind::Workflow(workflow) => {
                workflow.validate()?;
                workflow.start_points(start_points)?;
                for member in workflow.jobs() {
                    let member = self.catalog.job(member)?;
                    self.check_job(&member, None, visited)?;
                }
            }
        }
        Ok(())
    }

    async fn run_guarded(
        &self,
        job: &Job,
        request: RunRequest,
        targets: BTreeSet<DeviceId>,
    ) -> Result<RunOutcome, EngineError> {
        let runtime = request.runtime.clone().unwrap_or_else(Runtime::now);
        let parent = request.parent_runtime.clone();
        let started = Instant::now();

        let mut run = StoredRun::new(runtime.clone(), job.id.clone(), &job.name)
            .with_parent(parent.clone())
            .with_task(request.task_id.clone());
        self.storage.save_run(run.clone()).await?;

        info!(job = %job.id, runtime = %runtime, targets = targets.len(), "starting run");
        self.emit(Event::job_started(
            job.id.clone(),
            runtime.clone(),
            parent.clone(),
        ))
        .await;

        let body = match &job.kind {
            JobKind::Service(service) => self
                .run_service(job, service, &runtime, parent.as_ref(), &targets, &request.payload)
                .await
                .map(|(success, result)| (success, result, BTreeMap::new())),
            JobKind::Workflow(workflow) => {
                self.run_workflow(workflow, &runtime, parent.as_ref(), &targets, request)
                    .await
            }
        };

        let (success, result, states) = match body {
            Ok(body) => body,
            Err(e) => {
                run.mark_aborted(e.to_string());
                if let Err(update) = self.storage.update_run(run).await {
                    warn!(job = %job.id, error = %update, "failed to record aborted run");
                }
                self.emit(Event::job_completed(
                    job.id.clone(),
                    runtime,
                    parent,
                    false,
                    started.elapsed(),
                ))
                .await;
                return Err(e);
            }
        };

        self.storage
            .save_result(
                StoredResult::global(
                    runtime.clone(),
                    job.id.clone(),
                    &job.name,
                    success,
                    result.clone(),
                )
                .with_parent(parent.clone()),
            )
            .await?;
        run.mark_finished(success);
        self.storage.update_run(run).await?;

        info!(job = %job.id, runtime = %runtime, success, "run finished");
        self.emit(Event::job_completed(
            job.id.clone(),
            runtime.clone(),
            parent.clone(),
            success,
            started.elapsed(),
        ))
        .await;

        Ok(RunOutcome {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            job_type: job.job_type(),
            runtime,
            parent_runtime: parent,
            success,
            result,
            states,
        })
    }

    /// Run a service once, or once per target device, without short-circuit.
    async fn run_service(
        &self,
        job: &Job,
        service: &Service,
        runtime: &Runtime,
        parent: Option<&Runtime>,
        targets: &BTreeSet<DeviceId>,
        payload: &Map<String, Value>,
    ) -> Result<(bool, Value), EngineError> {
        let driver = self.drivers.get(&service.driver)?;
        let base = DriverRequest {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            runtime: runtime.clone(),
            device: None,
            command: service.command.clone(),
            parameters: service.parameters.clone(),
            payload: payload.clone(),
            logger: self.logs.logger(parent.unwrap_or(runtime).clone()),
        };

        if service.deviceless {
            let output = invoke(driver.as_ref(), &self.workers, &base).await;
            return Ok((
                output.success,
                json!({ "success": output.success, "result": output.output }),
            ));
        }

        let devices = targets
            .iter()
            .map(|id| self.catalog.device(id))
            .collect::<Result<Vec<Device>, _>>()?;
        debug!(job = %job.id, devices = devices.len(), "dispatching device work");

        let mut set = JoinSet::new();
        for device in devices {
            let driver = Arc::clone(&driver);
            let workers = Arc::clone(&self.workers);
            let storage = Arc::clone(&self.storage);
            let parent = parent.cloned();
            let mut request = base.clone();
            request.device = Some(device.clone());

            let span = info_span!("device_run", job = %job.id, device = %device.id);
            set.spawn(
                async move {
                    let output = invoke(driver.as_ref(), &workers, &request).await;
                    let result = StoredResult::global(
                        request.runtime.clone(),
                        request.job_id.clone(),
                        &request.job_name,
                        output.success,
                        output.output.clone(),
                    )
                    .for_device(device.id.clone(), &device.name)
                    .with_parent(parent);
                    let saved = storage.save_result(result).await;
                    (device, output, saved)
                }
                .instrument(span),
            );
        }

        let mut success = true;
        let mut outputs = Map::new();
        let mut storage_error = None;
        while let Some(joined) = set.join_next().await {
            let (device, output, saved) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(job = %job.id, error = %e, "device task did not complete");
                    success = false;
                    continue;
                }
            };
            if let Err(e) = saved {
                storage_error.get_or_insert(e);
            }
            self.emit(Event::device_completed(
                job.id.clone(),
                runtime.clone(),
                parent.cloned(),
                device.id.clone(),
                output.success,
            ))
            .await;
            success &= output.success;
            outputs.insert(device.name, output.output);
        }
        if let Some(e) = storage_error {
            return Err(e.into());
        }

        Ok((success, json!({ "success": success, "devices": outputs })))
    }

    /// Walk a workflow graph breadth-first from its start points.
    ///
    /// Each member runs at most once: the first arrival wins, later arrivals
    /// and cycles back to it are ignored. Members never reached end Skipped.
    async fn run_workflow(
        &self,
        workflow: &Workflow,
        runtime: &Runtime,
        parent: Option<&Runtime>,
        targets: &BTreeSet<DeviceId>,
        request: RunRequest,
    ) -> Result<(bool, Value, BTreeMap<JobId, NodeState>), EngineError> {
        let top = parent.unwrap_or(runtime).clone();
        let logger = self.logs.logger(top.clone());
        let start = workflow.start_points(request.start_points.as_deref())?;

        let mut names = HashMap::new();
        for member in workflow.jobs() {
            names.insert(member.clone(), self.catalog.job(member)?.name);
        }

        let mut payload = request.payload;
        let mut results = Map::new();
        for name in names.values() {
            if let Some(reused) = payload.get(name) {
                results.insert(name.clone(), reused.clone());
            }
        }

        let mut states: BTreeMap<JobId, NodeState> = workflow
            .jobs()
            .iter()
            .map(|id| (id.clone(), NodeState::Pending))
            .collect();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<JobId> = start.into_iter().collect();
        let mut success = true;

        while let Some(job_id) = queue.pop_front() {
            if !visited.insert(job_id.clone()) {
                continue;
            }
            let name = names.get(&job_id).cloned().unwrap_or_else(|| job_id.to_string());
            states.insert(job_id.clone(), NodeState::Running);

            let child_request = RunRequest {
                runtime: Some(Runtime::now()),
                parent_runtime: Some(top.clone()),
                targets: workflow.use_workflow_targets.then(|| targets.clone()),
                payload: payload.clone(),
                start_points: None,
                task_id: None,
            };
            let (passed, result) = match self.run(job_id.clone(), child_request).await {
                Ok(outcome) => (outcome.success, outcome.result),
                Err(EngineError::Storage(e)) => return Err(e.into()),
                Err(e) => {
                    logger.error(None, &format!("{} could not run: {}", name, e));
                    (false, json!({ "success": false, "error": e.to_string() }))
                }
            };
            payload.insert(name.clone(), result.clone());
            results.insert(name.clone(), result);

            states.insert(
                job_id.clone(),
                if passed {
                    NodeState::Succeeded
                } else {
                    NodeState::Failed
                },
            );
            success &= passed;

            for edge in workflow.outgoing(&job_id) {
                if edge.subtype.matches(passed) && !visited.contains(&edge.destination) {
                    logger.info(
                        None,
                        &format!(
                            "Following {} edge from {} to {}",
                            edge.subtype, job_id, edge.destination
                        ),
                    );
                    queue.push_back(edge.destination.clone());
                }
            }
        }

        for state in states.values_mut() {
            if *state == NodeState::Pending {
                *state = NodeState::Skipped;
            }
        }

        let state_names: Map<String, Value> = states
            .iter()
            .map(|(id, state)| {
                let name = names.get(id).cloned().unwrap_or_else(|| id.to_string());
                (name, json!(state))
            })
            .collect();

        Ok((
            success,
            json!({ "success": success, "results": results, "states": state_names }),
            states,
        ))
    }

    async fn emit(&self, event: Event) {
        self.logs.handle(&event).await;
        self.event_bus.emit(event).await;
    }
}

/// Call a driver inside a worker slot, turning errors into failed outputs.
async fn invoke(
    driver: &dyn DeviceDriver,
    workers: &Semaphore,
    request: &DriverRequest,
) -> DriverOutput {
    let _permit = workers.acquire().await.ok();
    let device = request.device.as_ref().map(|d| d.name.as_str());
    match driver.execute(request).await {
        Ok(output) => output,
        Err(err) => {
            request.logger.error(device, &err.to_string());
            DriverOutput::from_error(&err)
        }
    }
}
