//! Platform builder from YAML configuration.
//!
//! This module turns a validated inventory into catalog objects and tasks,
//! and opens the stores, engine and scheduler described by the global
//! configuration.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::catalog::Catalog;
use crate::core::device::{Device, Pool};
use crate::core::job::{Job, Service};
use crate::core::task::Task;
use crate::core::types::JobId;
use crate::events::EventBus;
use crate::execution::{DriverRegistry, RunEngine};
use crate::scheduler::{InMemoryScheduleStore, ScheduleStore, Scheduler};
use crate::storage::{InMemoryStorage, Storage, StorageError};

use super::error::ConfigError;
use super::types::{
    DeviceConfig, GlobalConfig, InventoryConfig, PoolConfig, ServiceConfig, StorageConfig,
    TaskConfig, WorkflowConfig,
};
use super::yaml::YamlLoader;

/// Builds catalog objects from inventory configuration.
pub struct InventoryBuilder;

impl InventoryBuilder {
    /// Install every device, pool and job of `config` into `catalog` and
    /// return its tasks.
    ///
    /// The inventory is validated first; nothing is installed when it is
    /// invalid.
    pub fn install(config: &InventoryConfig, catalog: &Catalog) -> Result<Vec<Task>, ConfigError> {
        YamlLoader::validate_inventory(config)?;

        for device in &config.devices {
            catalog.insert_device(Self::build_device(device))?;
        }
        for pool in &config.pools {
            catalog.insert_pool(Self::build_pool(pool))?;
        }
        for service in &config.services {
            catalog.add_job(Self::build_service(service))?;
        }
        for workflow in &config.workflows {
            catalog.add_job(Self::build_workflow(workflow))?;
        }

        // Members and edges once every job exists.
        for workflow in &config.workflows {
            let workflow_id = JobId::new(&workflow.id);
            let members: Vec<JobId> = workflow.jobs.iter().map(JobId::new).collect();
            catalog.add_jobs_to_workflow(&workflow_id, &members)?;
            for edge in &workflow.edges {
                catalog.add_edge(
                    &workflow_id,
                    edge.subtype,
                    &JobId::new(&edge.source),
                    &JobId::new(&edge.destination),
                )?;
            }
            debug!(
                workflow = %workflow_id,
                members = members.len(),
                edges = workflow.edges.len(),
                "installed workflow"
            );
        }

        Ok(config.tasks.iter().map(Self::build_task).collect())
    }

    fn build_device(config: &DeviceConfig) -> Device {
        let mut device = Device::new(&config.id, config.name.as_deref().unwrap_or(&config.id))
            .with_ip(&config.ip_address);
        device.vendor = config.vendor.clone();
        device.operating_system = config.operating_system.clone();
        device.model = config.model.clone();
        device.location = config.location.clone();
        device.properties = config.properties.clone();
        device
    }

    fn build_pool(config: &PoolConfig) -> Pool {
        config.criteria.iter().fold(
            Pool::new(&config.id, config.name.as_deref().unwrap_or(&config.id))
                .with_mode(config.mode),
            |pool, criterion| {
                pool.with_criterion(&criterion.property, &criterion.value, criterion.kind)
            },
        )
    }

    fn build_service(config: &ServiceConfig) -> Job {
        let mut service = Service::new(&config.driver);
        service.command = config.command.clone();
        service.deviceless = config.deviceless;
        service.parameters = config.parameters.clone();
        Job::service(config.id.as_str(), &config.name, service)
            .with_description(config.description.clone().unwrap_or_default())
            .with_devices(config.devices.iter().map(String::as_str))
            .with_pools(config.pools.iter().map(String::as_str))
    }

    fn build_workflow(config: &WorkflowConfig) -> Job {
        let mut job = Job::workflow(config.id.as_str(), &config.name)
            .with_description(config.description.clone().unwrap_or_default())
            .with_devices(config.devices.iter().map(String::as_str))
            .with_pools(config.pools.iter().map(String::as_str));
        if let Some(workflow) = job.as_workflow_mut() {
            workflow.use_workflow_targets = config.use_workflow_targets;
        }
        job
    }

    /// Configured tasks keep their id as timer key so timers survive restarts.
    fn build_task(config: &TaskConfig) -> Task {
        let mut task = Task::new(
            config.id.as_str(),
            config.name.clone().unwrap_or_else(|| config.id.clone()),
            config.job.as_str(),
            config.trigger.clone(),
        )
        .with_schedule_id(config.id.as_str())
        .with_devices(config.devices.iter().map(String::as_str))
        .with_pools(config.pools.iter().map(String::as_str))
        .with_payload(config.payload.clone());
        task.description = config.description.clone().unwrap_or_default();
        task.is_active = config.active;
        task
    }
}

/// Load and merge every inventory file of a directory, then validate the
/// merged inventory.
///
/// Files are read in name order; only `.yaml` and `.yml` files are used.
pub fn load_inventory_from_directory(dir: impl AsRef<Path>) -> Result<InventoryConfig, ConfigError> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let mut paths = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::DirReadError {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let path = entry?.path();
        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut inventory = InventoryConfig::default();
    for path in &paths {
        inventory.merge(YamlLoader::load_inventory_file(path)?);
    }
    YamlLoader::validate_inventory(&inventory)?;
    Ok(inventory)
}

/// Open the store for jobs, tasks, runs and results.
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, ConfigError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryStorage::new())),
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            info!(path = %path, "opening SQLite storage");
            Ok(Arc::new(crate::storage::SqliteStorage::new(path).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => Err(sqlite_disabled()),
    }
}

/// Open the schedule store.
pub async fn open_schedule_store(
    config: &StorageConfig,
) -> Result<Arc<dyn ScheduleStore>, ConfigError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryScheduleStore::new())),
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            info!(path = %path, "opening SQLite schedule store");
            Ok(Arc::new(crate::scheduler::SqliteScheduleStore::new(path).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => Err(sqlite_disabled()),
    }
}

#[cfg(not(feature = "sqlite"))]
fn sqlite_disabled() -> ConfigError {
    ConfigError::InvalidConfig("SQLite support is not compiled in".into())
}

/// Everything needed to start the automation controller.
pub struct Platform {
    pub catalog: Arc<Catalog>,
    pub engine: Arc<RunEngine>,
    pub scheduler: Scheduler,
    /// Tasks of the inventory, already synchronised into storage.
    pub tasks: Vec<Task>,
}

impl Platform {
    /// Build the catalog, stores, engine and scheduler from configuration.
    ///
    /// Configured tasks are written to storage: new ones are added, existing
    /// ones are replaced while keeping their stored timer key.
    pub async fn build(
        global: &GlobalConfig,
        inventory: &InventoryConfig,
        event_bus: Arc<EventBus>,
    ) -> Result<Self, ConfigError> {
        let catalog = Arc::new(Catalog::new());
        let tasks = InventoryBuilder::install(inventory, &catalog)?;

        let storage = open_storage(&global.storage).await?;
        let schedule_store = open_schedule_store(&global.schedule_store).await?;

        let mut tasks_synced = Vec::with_capacity(tasks.len());
        for task in tasks {
            let task = match storage.get_task(&task.id).await {
                Ok(stored) => {
                    let task = task.with_schedule_id(stored.schedule_id().clone());
                    storage.update_task(task.clone()).await?;
                    task
                }
                Err(StorageError::NotFound(_)) => {
                    storage.save_task(task.clone()).await?;
                    task
                }
                Err(e) => return Err(e.into()),
            };
            tasks_synced.push(task);
        }

        let drivers = DriverRegistry::with_defaults(global.drivers.command.timeout());
        let mut engine = RunEngine::new(Arc::clone(&catalog), storage, drivers)
            .with_event_bus(event_bus);
        if let Some(size) = global.worker_pool_size {
            engine = engine.with_worker_pool(size);
        }
        if let Some(retention) = global.log_retention {
            engine = engine.with_log_retention(retention);
        }
        let engine = Arc::new(engine);

        let settings = &global.scheduler;
        let scheduler = Scheduler::new(Arc::clone(&engine), schedule_store)
            .with_tick_interval(settings.tick_interval())
            .with_misfire_grace(settings.misfire_grace())
            .with_coalesce(settings.coalesce)
            .with_max_instances(settings.max_instances)
            .with_fire_workers(settings.fire_workers)
            .with_shutdown_timeout(settings.shutdown_timeout());

        info!(
            devices = inventory.devices.len(),
            jobs = inventory.services.len() + inventory.workflows.len(),
            tasks = tasks_synced.len(),
            "platform built"
        );

        Ok(Self {
            catalog,
            engine,
            scheduler,
            tasks: tasks_synced,
        })
    }
}
