//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Firing schedule entries when they fall due
//! - Coalescing missed fires and dropping fires past the misfire grace
//! - Capping concurrent instances per entry
//! - One-off dispatch through the same worker pool
//! - Recovery from interruptions
//! - Event emission

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::targets;
use crate::core::trigger::Trigger;
use crate::core::types::{JobId, Runtime, ScheduleId, TaskId};
use crate::events::Event;
use crate::execution::{EngineError, RunEngine, RunRequest};
use crate::storage::StorageError;

use super::handle::{SchedulerHandle, COMMAND_CHANNEL_BUFFER};
use super::store::{ScheduleEntry, ScheduleStore};
use super::types::{ScheduleInfo, SchedulerCommand, SchedulerError, SchedulerState};

/// Default interval between due checks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default lateness after which a fire is dropped.
pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(5);

/// Default cap on concurrent instances of one entry.
pub const DEFAULT_MAX_INSTANCES: usize = 3;

/// Default number of concurrently dispatched runs.
pub const DEFAULT_FIRE_WORKERS: usize = 50;

/// Default time to wait for in-flight runs at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

type RunningMap = HashMap<Uuid, (Option<ScheduleId>, JoinHandle<()>)>;

/// Timer service firing tasks into the run engine.
pub struct Scheduler {
    /// Run engine dispatched runs go to.
    engine: Arc<RunEngine>,
    /// Durable schedule entries.
    store: Arc<dyn ScheduleStore>,
    /// Tick interval for checking due entries.
    tick_interval: Duration,
    misfire_grace: Duration,
    /// Run missed fires once instead of once per fire.
    coalesce: bool,
    max_instances: usize,
    /// Bounds concurrently dispatched runs.
    workers: Arc<Semaphore>,
    /// Dispatched runs by dispatch id, with the entry that fired them.
    running: Arc<RwLock<RunningMap>>,
    /// Graceful shutdown timeout.
    shutdown_timeout: Duration,
}

impl Scheduler {
    /// Create a scheduler with default settings.
    pub fn new(engine: Arc<RunEngine>, store: Arc<dyn ScheduleStore>) -> Self {
        Self {
            engine,
            store,
            tick_interval: DEFAULT_TICK_INTERVAL,
            misfire_grace: DEFAULT_MISFIRE_GRACE,
            coalesce: true,
            max_instances: DEFAULT_MAX_INSTANCES,
            workers: Arc::new(Semaphore::new(DEFAULT_FIRE_WORKERS)),
            running: Arc::new(RwLock::new(HashMap::new())),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }

    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    /// Set the cap on concurrent instances per entry (at least 1).
    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = max.max(1);
        self
    }

    /// Set the number of concurrently dispatched runs (at least 1).
    pub fn with_fire_workers(mut self, workers: usize) -> Self {
        self.workers = Arc::new(Semaphore::new(workers.max(1)));
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<RunEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }

    /// Start the scheduler and return a handle for controlling it.
    pub async fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        match self.store.list().await {
            Ok(entries) => info!(entries = entries.len(), "restored schedule entries"),
            Err(e) => warn!(error = %e, "failed to list schedule entries at startup"),
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, scheduler_task)
    }

    /// Recover from a crash.
    ///
    /// Runs still marked Running are marked Interrupted and every job is
    /// reset to Idle. Returns the interrupted runtimes.
    pub async fn recover(&self) -> Result<Vec<Runtime>, SchedulerError> {
        let storage = self.engine.storage();
        let mut recovered = Vec::new();
        for run in storage.get_incomplete_runs().await? {
            storage.mark_run_interrupted(&run.runtime).await?;
            warn!(job = %run.job_id, runtime = %run.runtime, "marked interrupted run");
            recovered.push(run.runtime);
        }
        let reset = storage.reset_job_statuses().await?;
        if reset > 0 {
            info!(jobs = reset, "reset job statuses to Idle");
        }
        Ok(recovered)
    }

    /// Main scheduler loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        let mut interval = tokio::time::interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *state.read().await == SchedulerState::Running {
                        self.check_due(Utc::now()).await;
                    }
                    self.cleanup_finished().await;
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::Register { id, task_id, trigger, response } => {
                            let result = self.register(id, task_id, trigger).await;
                            let _ = response.send(result);
                        }
                        SchedulerCommand::Pause { id, response } => {
                            let _ = response.send(self.set_paused(&id, true).await);
                        }
                        SchedulerCommand::Resume { id, response } => {
                            let _ = response.send(self.set_paused(&id, false).await);
                        }
                        SchedulerCommand::Remove { id, response } => {
                            let result = self.store.remove(&id).await.map_err(not_found(&id));
                            if result.is_ok() {
                                info!(schedule = %id, "removed schedule entry");
                            }
                            let _ = response.send(result);
                        }
                        SchedulerCommand::Get { id, response } => {
                            let result = match self.store.get(&id).await.map_err(not_found(&id)) {
                                Ok(entry) => Ok(self.info(entry).await),
                                Err(e) => Err(e),
                            };
                            let _ = response.send(result);
                        }
                        SchedulerCommand::List { response } => {
                            let result = match self.store.list().await {
                                Ok(entries) => {
                                    let mut infos = Vec::with_capacity(entries.len());
                                    for entry in entries {
                                        infos.push(self.info(entry).await);
                                    }
                                    Ok(infos)
                                }
                                Err(e) => Err(e.into()),
                            };
                            let _ = response.send(result);
                        }
                        SchedulerCommand::RunNow { job_id, request, response } => {
                            self.dispatch(None, job_id, request).await;
                            let _ = response.send(Ok(()));
                        }
                        SchedulerCommand::PauseAll { response } => {
                            *state.write().await = SchedulerState::Paused;
                            info!("scheduler paused");
                            let _ = response.send(());
                        }
                        SchedulerCommand::ResumeAll { response } => {
                            *state.write().await = SchedulerState::Running;
                            info!("scheduler resumed");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Shutdown { response } => {
                            *state.write().await = SchedulerState::Stopped;

                            // Wait for running jobs to complete with timeout
                            self.await_running().await;

                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn register(
        &self,
        id: ScheduleId,
        task_id: TaskId,
        trigger: Trigger,
    ) -> Result<ScheduleInfo, SchedulerError> {
        let replaced = self.store.get(&id).await.is_ok();
        let entry = ScheduleEntry::new(id, task_id, trigger, Utc::now())?;
        self.store.upsert(entry.clone()).await?;
        info!(
            schedule = %entry.id,
            task = %entry.task_id,
            next_run_time = ?entry.next_run_time,
            replaced,
            "registered schedule entry"
        );
        Ok(self.info(entry).await)
    }

    async fn set_paused(
        &self,
        id: &ScheduleId,
        paused: bool,
    ) -> Result<ScheduleInfo, SchedulerError> {
        let mut entry = self.store.get(id).await.map_err(not_found(id))?;
        if !paused && entry.paused {
            entry.next_run_time = entry.trigger.next_fire(None, Utc::now())?;
        }
        entry.paused = paused;
        self.store.upsert(entry.clone()).await?;
        debug!(schedule = %id, paused, "schedule entry updated");
        Ok(self.info(entry).await)
    }

    async fn info(&self, entry: ScheduleEntry) -> ScheduleInfo {
        let running = self.count_running(&entry.id).await;
        ScheduleInfo::from_entry(entry, running)
    }

    /// Fire every entry due at `now`.
    async fn check_due(&self, now: DateTime<Utc>) {
        let due = match self.store.due(now).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "failed to load due schedule entries");
                return;
            }
        };
        for entry in due {
            let id = entry.id.clone();
            if let Err(e) = self.process_entry(entry, now).await {
                warn!(schedule = %id, error = %e, "failed to process schedule entry");
            }
        }
    }

    async fn process_entry(
        &self,
        mut entry: ScheduleEntry,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let Some(first) = entry.next_run_time else {
            return Ok(());
        };
        let (latest, due_count) = entry.trigger.latest_fire(first, now)?;
        let next = entry.trigger.next_fire(Some(latest), now)?;

        let scheduled = if self.coalesce {
            if due_count > 1 {
                warn!(
                    schedule = %entry.id,
                    missed_occurrences = due_count,
                    "multiple fires missed, running once"
                );
            }
            vec![latest]
        } else {
            let mut fires = vec![first];
            fires.extend(entry.trigger.fires_between(first, now)?);
            if fires.last() != Some(&latest) {
                fires.push(latest);
            }
            fires
        };

        match next {
            Some(next) => {
                entry.next_run_time = Some(next);
                self.store.upsert(entry.clone()).await?;
            }
            None => {
                self.store.remove(&entry.id).await?;
                debug!(schedule = %entry.id, "trigger exhausted, entry removed");
            }
        }

        for fire_time in scheduled {
            let late_by = (now - fire_time).to_std().unwrap_or_default();
            if late_by > self.misfire_grace {
                warn!(schedule = %entry.id, late_by = ?late_by, "fire missed its grace window");
                self.emit(Event::task_misfired(
                    entry.id.clone(),
                    entry.task_id.clone(),
                    late_by,
                ))
                .await;
                continue;
            }
            let running = self.count_running(&entry.id).await;
            if running >= self.max_instances {
                warn!(
                    schedule = %entry.id,
                    running,
                    max_instances = self.max_instances,
                    "maximum instances reached, fire skipped"
                );
                self.emit(Event::task_skipped(
                    entry.id.clone(),
                    entry.task_id.clone(),
                    running,
                ))
                .await;
                continue;
            }
            self.fire(&entry).await;
        }
        Ok(())
    }

    /// Dispatch the task behind an entry with its current targets and payload.
    async fn fire(&self, entry: &ScheduleEntry) {
        let task = match self.engine.storage().get_task(&entry.task_id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(schedule = %entry.id, task = %entry.task_id, error = %e, "cannot load fired task");
                return;
            }
        };

        let mut request = RunRequest::new()
            .with_payload(task.payload.clone())
            .with_task(task.id.clone());
        if !task.devices.is_empty() || !task.pools.is_empty() {
            match targets::resolve(self.engine.catalog(), &task.devices, &task.pools) {
                Ok(resolved) => request = request.with_targets(resolved),
                Err(e) => {
                    warn!(task = %task.id, error = %e, "cannot resolve task targets");
                    return;
                }
            }
        }

        info!(schedule = %entry.id, task = %task.id, job = %task.job, "firing task");
        self.emit(Event::task_fired(entry.id.clone(), task.id.clone()))
            .await;
        self.dispatch(Some(entry.id.clone()), task.job, request).await;
    }

    /// Run a job in the background, bounded by the worker pool.
    async fn dispatch(&self, schedule: Option<ScheduleId>, job_id: JobId, request: RunRequest) {
        let dispatch_id = Uuid::new_v4();
        let engine = Arc::clone(&self.engine);
        let workers = Arc::clone(&self.workers);
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            match engine.execute(&job_id, request).await {
                Ok(outcome) => info!(
                    job = %job_id,
                    runtime = %outcome.runtime,
                    success = outcome.success,
                    "dispatched run finished"
                ),
                Err(EngineError::AlreadyRunning { .. }) => {
                    warn!(job = %job_id, "job already running, dispatch dropped")
                }
                Err(e) => warn!(job = %job_id, error = %e, "dispatched run failed"),
            }
            running.write().await.remove(&dispatch_id);
        });

        self.running
            .write()
            .await
            .insert(dispatch_id, (schedule, handle));
    }

    async fn emit(&self, event: Event) {
        self.engine.event_bus().emit(event).await;
    }

    /// Count running instances of one entry.
    async fn count_running(&self, id: &ScheduleId) -> usize {
        let running = self.running.read().await;
        running
            .values()
            .filter(|(schedule, handle)| schedule.as_ref() == Some(id) && !handle.is_finished())
            .count()
    }

    /// Clean up finished run handles.
    async fn cleanup_finished(&self) {
        let mut running = self.running.write().await;
        running.retain(|_, (_, handle)| !handle.is_finished());
    }

    /// Wait for all dispatched runs to complete with a timeout.
    async fn await_running(&self) {
        let running_count = self.running.read().await.len();

        if running_count == 0 {
            info!("No running jobs to wait for during shutdown");
            return;
        }

        info!(
            "Graceful shutdown: waiting for {} running job(s) to complete (timeout: {:?})",
            running_count, self.shutdown_timeout
        );

        let start = tokio::time::Instant::now();
        let deadline = start + self.shutdown_timeout;

        loop {
            let mut running = self.running.write().await;
            running.retain(|_, (_, handle)| !handle.is_finished());
            let remaining = running.len();
            drop(running);

            if remaining == 0 {
                info!("All running jobs completed gracefully in {:?}", start.elapsed());
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Graceful shutdown timeout ({:?}) exceeded with {} job(s) still running",
                    self.shutdown_timeout, remaining
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Map a store miss on `id` to [`SchedulerError::NotFound`].
fn not_found(id: &ScheduleId) -> impl FnOnce(StorageError) -> SchedulerError + '_ {
    move |e| match e {
        StorageError::NotFound(_) => SchedulerError::NotFound(id.clone()),
        other => SchedulerError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::Task;
    use crate::core::trigger::TriggerSpec;
    use crate::events::EventHandler;
    use crate::scheduler::store::InMemoryScheduleStore;
    use crate::storage::Storage;
    use crate::testing::TestHarness;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Mutex;

    // Recording event handler
    struct RecordingHandler {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        async fn events(&self) -> Vec<Event> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &Event) {
            self.events.lock().await.push(event.clone());
        }
    }

    async fn setup() -> (TestHarness, Scheduler) {
        let harness = TestHarness::new().with_devices(["r1"]);
        harness.add_service("backup", false);
        harness
            .storage()
            .save_task(
                Task::new("nightly", "Nightly", "backup", TriggerSpec::immediate())
                    .with_devices(["r1"]),
            )
            .await
            .unwrap();
        let scheduler = Scheduler::new(
            Arc::clone(harness.engine()),
            Arc::new(InMemoryScheduleStore::new()),
        );
        (harness, scheduler)
    }

    fn interval(seconds: u64, start: DateTime<Utc>) -> Trigger {
        Trigger::Interval {
            seconds,
            start,
            end: None,
        }
    }

    async fn put_entry(scheduler: &Scheduler, trigger: Trigger, next: DateTime<Utc>) {
        scheduler
            .store
            .upsert(ScheduleEntry {
                id: ScheduleId::new("s1"),
                task_id: TaskId::new("nightly"),
                trigger,
                next_run_time: Some(next),
                paused: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (_harness, scheduler) = setup().await;
        let (handle, task) = scheduler.start().await;
        let trigger = interval(60, Utc::now() + ChronoDuration::seconds(60));

        let first = handle.register("s1", "nightly", trigger.clone()).await.unwrap();
        let second = handle.register("s1", "nightly", trigger).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(handle.list().await.unwrap().len(), 1);

        handle.shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_pause_resume_remove_entry() {
        let (_harness, scheduler) = setup().await;
        let (handle, task) = scheduler.start().await;
        let trigger = interval(60, Utc::now() + ChronoDuration::seconds(60));
        handle.register("s1", "nightly", trigger).await.unwrap();

        let paused = handle.pause("s1").await.unwrap();
        assert!(paused.paused);
        let resumed = handle.resume("s1").await.unwrap();
        assert!(!resumed.paused);
        assert!(resumed.next_run_time.is_some());

        handle.remove("s1").await.unwrap();
        assert!(matches!(
            handle.remove("s1").await,
            Err(SchedulerError::NotFound(id)) if id.as_str() == "s1"
        ));
        assert!(matches!(
            handle.pause("s1").await,
            Err(SchedulerError::NotFound(_))
        ));

        handle.shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_scheduler_fires_due_entry() {
        let (harness, scheduler) = setup().await;
        let scheduler = scheduler.with_tick_interval(Duration::from_millis(50));
        let (handle, task) = scheduler.start().await;

        handle
            .register("s1", "nightly", interval(1, Utc::now()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1300)).await;
        handle.shutdown().await.unwrap();
        let _ = task.await;

        let calls = harness.driver().calls_for(&"backup".into());
        assert!(!calls.is_empty());
        let runs = harness
            .storage()
            .list_runs(&"backup".into(), 10)
            .await
            .unwrap();
        assert!(runs
            .iter()
            .all(|run| run.task_id == Some(TaskId::new("nightly"))));
    }

    #[tokio::test]
    async fn test_missed_fires_coalesce_into_one() {
        let (harness, scheduler) = setup().await;
        let now = Utc::now();
        put_entry(
            &scheduler,
            interval(1, now - ChronoDuration::seconds(3)),
            now - ChronoDuration::seconds(3),
        )
        .await;

        scheduler.check_due(now).await;
        scheduler.await_running().await;

        assert_eq!(harness.driver().calls().len(), 1);
        let entry = scheduler.store.get(&"s1".into()).await.unwrap();
        assert!(entry.next_run_time.is_some_and(|next| next > now));
    }

    #[tokio::test]
    async fn test_long_downtime_runs_newest_fire() {
        let (harness, scheduler) = setup().await;
        let recorder = RecordingHandler::new();
        harness.engine().event_bus().register(recorder.clone()).await;
        let now = Utc::now();
        let behind = now - ChronoDuration::seconds(2000);
        put_entry(&scheduler, interval(1, behind), behind).await;

        scheduler.check_due(now).await;
        scheduler.await_running().await;

        assert_eq!(harness.driver().calls().len(), 1);
        assert!(!recorder
            .events()
            .await
            .iter()
            .any(|e| matches!(e, Event::TaskMisfired { .. })));
        let entry = scheduler.store.get(&"s1".into()).await.unwrap();
        assert!(entry.next_run_time.is_some_and(|next| next > now));
    }

    #[tokio::test]
    async fn test_fire_past_grace_is_dropped() {
        let (harness, scheduler) = setup().await;
        let recorder = RecordingHandler::new();
        harness.engine().event_bus().register(recorder.clone()).await;

        let now = Utc::now();
        let run_date = now - ChronoDuration::seconds(60);
        put_entry(&scheduler, Trigger::Date { run_date }, run_date).await;

        scheduler.check_due(now).await;
        scheduler.await_running().await;

        assert!(harness.driver().calls().is_empty());
        assert!(recorder
            .events()
            .await
            .iter()
            .any(|e| matches!(e, Event::TaskMisfired { .. })));
        // A date trigger has no further fire.
        assert!(scheduler.store.get(&"s1".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_date_trigger_fires_once_within_grace() {
        let (harness, scheduler) = setup().await;
        let now = Utc::now();
        let run_date = now - ChronoDuration::seconds(2);
        put_entry(&scheduler, Trigger::Date { run_date }, run_date).await;

        scheduler.check_due(now).await;
        scheduler.await_running().await;
        scheduler.check_due(now + ChronoDuration::seconds(1)).await;
        scheduler.await_running().await;

        assert_eq!(harness.driver().calls().len(), 1);
        assert!(scheduler.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_instances_skips_fire() {
        let (harness, scheduler) = setup().await;
        let scheduler = scheduler.with_max_instances(1);
        harness.driver().set_delay(Duration::from_millis(300));
        let recorder = RecordingHandler::new();
        harness.engine().event_bus().register(recorder.clone()).await;

        let now = Utc::now();
        put_entry(&scheduler, interval(1, now), now).await;

        scheduler.check_due(now).await;
        scheduler.check_due(now + ChronoDuration::milliseconds(1100)).await;
        scheduler.await_running().await;

        assert_eq!(harness.driver().calls().len(), 1);
        assert!(recorder
            .events()
            .await
            .iter()
            .any(|e| matches!(e, Event::TaskSkipped { running: 1, .. })));
    }

    #[tokio::test]
    async fn test_paused_scheduler_does_not_fire() {
        let (harness, scheduler) = setup().await;
        let scheduler = scheduler.with_tick_interval(Duration::from_millis(20));
        let (handle, task) = scheduler.start().await;

        handle.pause_all().await.unwrap();
        assert!(handle.is_paused().await);
        handle
            .register("s1", "nightly", interval(1, Utc::now()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(harness.driver().calls().is_empty());

        handle.resume_all().await.unwrap();
        assert!(handle.is_running().await);
        handle.shutdown().await.unwrap();
        let _ = task.await;
        assert_eq!(handle.state().await, SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_run_now_dispatches_without_entry() {
        let (harness, scheduler) = setup().await;
        let (handle, task) = scheduler.start().await;

        let runtime = Runtime::now();
        handle
            .run_now(
                "backup",
                RunRequest::new()
                    .with_runtime(runtime.clone())
                    .with_targets(["r1"]),
            )
            .await
            .unwrap();
        assert!(handle.list().await.unwrap().is_empty());

        // Shutdown waits for the dispatched run.
        handle.shutdown().await.unwrap();
        let _ = task.await;

        let run = harness.storage().get_run(&runtime).await.unwrap();
        assert_eq!(run.success, Some(true));
    }

    #[tokio::test]
    async fn test_recover_marks_interrupted_runs() {
        let (harness, scheduler) = setup().await;
        let storage = harness.storage();
        storage
            .save_job(crate::storage::StoredJob::new(
                "backup".into(),
                "BACKUP",
                crate::core::job::JobType::Service,
            ))
            .await
            .unwrap();
        assert!(storage.begin_job_run(&"backup".into()).await.unwrap());
        let runtime = Runtime::now();
        storage
            .save_run(crate::storage::StoredRun::new(
                runtime.clone(),
                "backup".into(),
                "BACKUP",
            ))
            .await
            .unwrap();

        let recovered = scheduler.recover().await.unwrap();

        assert_eq!(recovered, vec![runtime.clone()]);
        let run = storage.get_run(&runtime).await.unwrap();
        assert_eq!(run.status, crate::storage::RunStatus::Interrupted);
        assert!(storage.begin_job_run(&"backup".into()).await.unwrap());
    }
}
