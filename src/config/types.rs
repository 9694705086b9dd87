//! Configuration type definitions.
//!
//! This module contains the type definitions for YAML configuration structures:
//! the global settings file and the inventory files describing devices, pools,
//! services, workflows and tasks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::device::{MatchKind, MatchMode};
use crate::core::trigger::TriggerSpec;
use crate::core::workflow::EdgeSubtype;
use crate::scheduler::{
    DEFAULT_FIRE_WORKERS, DEFAULT_MAX_INSTANCES, DEFAULT_MISFIRE_GRACE, DEFAULT_SHUTDOWN_TIMEOUT,
    DEFAULT_TICK_INTERVAL,
};

/// Global configuration (netrun.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub scheduler: SchedulerConfig,
    /// Store for jobs, tasks, runs and results.
    pub storage: StorageConfig,
    /// Store for schedule entries, independent of `storage`.
    pub schedule_store: StorageConfig,
    pub drivers: DriversConfig,
    /// Maximum concurrent driver calls across all runs.
    pub worker_pool_size: Option<usize>,
    /// Number of finished runs whose log buffers are kept in memory.
    pub log_retention: Option<usize>,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub misfire_grace_secs: u64,
    pub coalesce: bool,
    pub max_instances: usize,
    pub fire_workers: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            misfire_grace_secs: DEFAULT_MISFIRE_GRACE.as_secs(),
            coalesce: true,
            max_instances: DEFAULT_MAX_INSTANCES,
            fire_workers: DEFAULT_FIRE_WORKERS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Built-in driver settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriversConfig {
    pub command: CommandDriverConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandDriverConfig {
    /// Kill commands running longer than this.
    pub timeout_secs: Option<u64>,
}

impl CommandDriverConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// One inventory file. Every section is optional; a directory of files is
/// merged before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub devices: Vec<DeviceConfig>,
    pub pools: Vec<PoolConfig>,
    pub services: Vec<ServiceConfig>,
    pub workflows: Vec<WorkflowConfig>,
    pub tasks: Vec<TaskConfig>,
}

impl InventoryConfig {
    /// Append every section of `other`.
    pub fn merge(&mut self, other: InventoryConfig) {
        self.devices.extend(other.devices);
        self.pools.extend(other.pools);
        self.services.extend(other.services);
        self.workflows.extend(other.workflows);
        self.tasks.extend(other.tasks);
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
            && self.pools.is_empty()
            && self.services.is_empty()
            && self.workflows.is_empty()
            && self.tasks.is_empty()
    }
}

/// Device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    /// Defaults to the id.
    pub name: Option<String>,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub location: String,
    /// Free-form properties, matched by pool criteria.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub mode: MatchMode,
    #[serde(default)]
    pub criteria: Vec<CriterionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionConfig {
    pub property: String,
    pub value: String,
    #[serde(default, rename = "match")]
    pub kind: MatchKind,
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Driver name, `command` or `noop` unless custom drivers are registered.
    pub driver: String,
    /// Command template for the `command` driver.
    pub command: Option<String>,
    #[serde(default)]
    pub deviceless: bool,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub pools: Vec<String>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Member job ids.
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub pools: Vec<String>,
    /// Children run against the workflow's targets.
    #[serde(default = "default_true")]
    pub use_workflow_targets: bool,
}

fn default_true() -> bool {
    true
}

/// Workflow edge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub source: String,
    pub destination: String,
    #[serde(default = "default_subtype")]
    pub subtype: EdgeSubtype,
}

fn default_subtype() -> EdgeSubtype {
    EdgeSubtype::Success
}

/// Task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Job the task runs.
    pub job: String,
    #[serde(flatten)]
    pub trigger: TriggerSpec,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub pools: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub active: bool,
}
