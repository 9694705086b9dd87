//! Job definitions.
//!
//! A job is either a leaf [`Service`] that does device work through a driver,
//! or a [`Workflow`] that sequences other jobs. Both share identity, targets
//! and layout positions; behavior is selected by matching on [`JobKind`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::types::{DeviceId, JobId, PoolId};
use super::workflow::Workflow;

/// Execution status of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// Discriminant of [`JobKind`], usable without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    Service,
    Workflow,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => write!(f, "Service"),
            Self::Workflow => write!(f, "Workflow"),
        }
    }
}

/// A leaf job executed through a device driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Name of the driver in the driver registry.
    pub driver: String,
    /// Command template; `{name}`, `{ip_address}` and `{runtime}` are substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Run once without a device instead of once per target.
    #[serde(default)]
    pub deviceless: bool,
    /// Static parameters handed to the driver.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Service {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            command: None,
            deviceless: false,
            parameters: Map::new(),
        }
    }
}

/// What a job does when it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobKind {
    Service(Service),
    Workflow(Workflow),
}

/// A runnable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: JobKind,
    /// Explicit target devices.
    #[serde(default)]
    pub devices: Vec<DeviceId>,
    /// Target pools, resolved at run time.
    #[serde(default)]
    pub pools: Vec<PoolId>,
    /// Layout position of this job in each workflow, keyed by workflow name.
    #[serde(default)]
    pub positions: BTreeMap<String, (f64, f64)>,
}

impl Job {
    /// Create a service job.
    pub fn service(id: impl Into<JobId>, name: impl Into<String>, service: Service) -> Self {
        Self::with_kind(id.into(), name.into(), JobKind::Service(service))
    }

    /// Create an empty workflow job.
    pub fn workflow(id: impl Into<JobId>, name: impl Into<String>) -> Self {
        let id = id.into();
        let workflow = Workflow::new(id.clone());
        Self::with_kind(id, name.into(), JobKind::Workflow(workflow))
    }

    fn with_kind(id: JobId, name: String, kind: JobKind) -> Self {
        Self {
            id,
            name,
            description: String::new(),
            kind,
            devices: Vec::new(),
            pools: Vec::new(),
            positions: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
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

    pub fn job_type(&self) -> JobType {
        match self.kind {
            JobKind::Service(_) => JobType::Service,
            JobKind::Workflow(_) => JobType::Workflow,
        }
    }

    pub fn as_service(&self) -> Option<&Service> {
        match &self.kind {
            JobKind::Service(service) => Some(service),
            JobKind::Workflow(_) => None,
        }
    }

    pub fn as_workflow(&self) -> Option<&Workflow> {
        match &self.kind {
            JobKind::Workflow(workflow) => Some(workflow),
            JobKind::Service(_) => None,
        }
    }

    pub fn as_workflow_mut(&mut self) -> Option<&mut Workflow> {
        match &mut self.kind {
            JobKind::Workflow(workflow) => Some(workflow),
            JobKind::Service(_) => None,
        }
    }

    /// Serialized view of the job, including its current status.
    pub fn serialize(&self, status: JobStatus) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Value::Object(map) = &mut value {
            map.insert("status".to_string(), json!(status));
        }
        value
    }

    /// One-line human summary.
    pub fn summary(&self, status: JobStatus) -> String {
        let detail = match &self.kind {
            JobKind::Service(service) => {
                if service.deviceless {
                    format!("driver {} (deviceless)", service.driver)
                } else {
                    format!("driver {}", service.driver)
                }
            }
            JobKind::Workflow(workflow) => format!(
                "{} jobs, {} edges",
                workflow.jobs().len(),
                workflow.edges().len()
            ),
        };
        format!(
            "{} '{}' [{}]: {}",
            self.job_type(),
            self.name,
            status,
            detail
        )
    }
}
