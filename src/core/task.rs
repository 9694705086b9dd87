//! Scheduled task definitions.
//!
//! A task binds a job to a trigger policy and a target set. It does not own
//! the job, devices or pools it references.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::trigger::{SchedulingMode, TriggerSpec};
use super::types::{DeviceId, JobId, PoolId, Runtime, ScheduleId, TaskId};

/// A schedulable binding of a job to a trigger and targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The job this task runs.
    pub job: JobId,
    #[serde(flatten)]
    pub trigger: TriggerSpec,
    #[serde(default)]
    pub devices: Vec<DeviceId>,
    #[serde(default)]
    pub pools: Vec<PoolId>,
    /// Fixed payload handed to every run.
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub is_active: bool,
    /// Key of the live timer. Assigned at creation and never changed.
    aps_job_id: ScheduleId,
    creation_time: String,
}

impl Task {
    /// Create an inactive task.
    ///
    /// The scheduler key defaults to the creation time.
    pub fn new(
        id: impl Into<TaskId>,
        name: impl Into<String>,
        job: impl Into<JobId>,
        trigger: TriggerSpec,
    ) -> Self {
        let creation_time = Runtime::now().to_string();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            job: job.into(),
            trigger,
            devices: Vec::new(),
            pools: Vec::new(),
            payload: Map::new(),
            is_active: false,
            aps_job_id: ScheduleId::new(creation_time.clone()),
            creation_time,
        }
    }

    /// Use an explicit scheduler key instead of the creation time.
    pub fn with_schedule_id(mut self, id: impl Into<ScheduleId>) -> Self {
        self.aps_job_id = id.into();
        self
    }

    pub fn with_devices<I, D>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DeviceId>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pools<I, P>(mut self, pools: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PoolId>,
    {
        self.pools = pools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn active(mut self) -> Self {
        self.is_active = true;
        self
    }

    pub fn schedule_id(&self) -> &ScheduleId {
        &self.aps_job_id
    }

    pub fn creation_time(&self) -> &str {
        &self.creation_time
    }

    pub fn periodic(&self) -> bool {
        self.trigger.is_periodic()
    }

    pub fn scheduling_mode(&self) -> SchedulingMode {
        self.trigger.effective_mode()
    }
}
