//! YAML configuration parsing.
//!
//! Parses the global settings file and inventory files from YAML, and
//! validates an inventory as a whole.

use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;

use crate::core::device::MatchKind;
use crate::core::trigger::Trigger;

use super::error::ConfigError;
use super::types::{GlobalConfig, InventoryConfig, StorageConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load global configuration from a file.
    pub fn load_global_config(path: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_global_config(&content)
    }

    /// Parse global configuration from a YAML string.
    pub fn parse_global_config(yaml: &str) -> Result<GlobalConfig, ConfigError> {
        let config: GlobalConfig = serde_yaml::from_str(yaml)?;
        Self::validate_global_config(&config)?;
        Ok(config)
    }

    fn validate_global_config(config: &GlobalConfig) -> Result<(), ConfigError> {
        let scheduler = &config.scheduler;
        if scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.tick_interval_ms cannot be zero".into(),
            ));
        }
        if scheduler.max_instances == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.max_instances cannot be zero".into(),
            ));
        }
        if scheduler.fire_workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "scheduler.fire_workers cannot be zero".into(),
            ));
        }
        if config.worker_pool_size == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "worker_pool_size cannot be zero".into(),
            ));
        }
        if config.log_retention == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "log_retention cannot be zero".into(),
            ));
        }
        for (field, store) in [
            ("storage", &config.storage),
            ("schedule_store", &config.schedule_store),
        ] {
            if let StorageConfig::Sqlite { path } = store {
                if path.is_empty() {
                    return Err(ConfigError::MissingField(format!("{}.path", field)));
                }
            }
        }
        Ok(())
    }

    /// Load one inventory file without cross-reference validation.
    pub fn load_inventory_file(path: impl AsRef<Path>) -> Result<InventoryConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse and validate a self-contained inventory from a YAML string.
    pub fn parse_inventory(yaml: &str) -> Result<InventoryConfig, ConfigError> {
        let config: InventoryConfig = serde_yaml::from_str(yaml)?;
        Self::validate_inventory(&config)?;
        Ok(config)
    }

    /// Validate an inventory: identities, references, edges, pool regexes
    /// and task triggers.
    pub fn validate_inventory(config: &InventoryConfig) -> Result<(), ConfigError> {
        let mut device_ids = HashSet::new();
        for device in &config.devices {
            if device.id.is_empty() {
                return Err(ConfigError::MissingField("device id".into()));
            }
            if !device_ids.insert(device.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate device id: {}",
                    device.id
                )));
            }
        }

        let mut pool_ids = HashSet::new();
        for pool in &config.pools {
            if pool.id.is_empty() {
                return Err(ConfigError::MissingField("pool id".into()));
            }
            if !pool_ids.insert(pool.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate pool id: {}",
                    pool.id
                )));
            }
            for criterion in &pool.criteria {
                if criterion.kind == MatchKind::Regex {
                    regex::Regex::new(&criterion.value).map_err(|e| {
                        ConfigError::InvalidConfig(format!(
                            "pool '{}' has an invalid regex for '{}': {}",
                            pool.id, criterion.property, e
                        ))
                    })?;
                }
            }
        }

        let check_targets = |owner: &str, devices: &[String], pools: &[String]| {
            for device in devices {
                if !device_ids.contains(device.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "'{}' references unknown device '{}'",
                        owner, device
                    )));
                }
            }
            for pool in pools {
                if !pool_ids.contains(pool.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "'{}' references unknown pool '{}'",
                        owner, pool
                    )));
                }
            }
            Ok(())
        };

        let mut job_ids = HashSet::new();
        let mut job_names = HashSet::new();
        for service in &config.services {
            if service.id.is_empty() {
                return Err(ConfigError::MissingField("service id".into()));
            }
            if service.name.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "name of service '{}'",
                    service.id
                )));
            }
            if service.driver.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "driver of service '{}'",
                    service.id
                )));
            }
            if !job_ids.insert(service.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate job id: {}",
                    service.id
                )));
            }
            if !job_names.insert(service.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate job name: {}",
                    service.name
                )));
            }
            check_targets(&service.id, &service.devices, &service.pools)?;
        }

        for workflow in &config.workflows {
            if workflow.id.is_empty() {
                return Err(ConfigError::MissingField("workflow id".into()));
            }
            if workflow.name.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "name of workflow '{}'",
                    workflow.id
                )));
            }
            if !job_ids.insert(workflow.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate job id: {}",
                    workflow.id
                )));
            }
            if !job_names.insert(workflow.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate job name: {}",
                    workflow.name
                )));
            }
            check_targets(&workflow.id, &workflow.devices, &workflow.pools)?;
        }

        // Members may be defined after the workflow that uses them.
        for workflow in &config.workflows {
            let mut members = HashSet::new();
            for member in &workflow.jobs {
                if member == &workflow.id {
                    return Err(ConfigError::InvalidConfig(format!(
                        "workflow '{}' cannot contain itself",
                        workflow.id
                    )));
                }
                if !job_ids.contains(member.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "workflow '{}' references unknown job '{}'",
                        workflow.id, member
                    )));
                }
                if !members.insert(member.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "workflow '{}' lists job '{}' twice",
                        workflow.id, member
                    )));
                }
            }

            let mut edges = HashSet::new();
            for edge in &workflow.edges {
                for end in [&edge.source, &edge.destination] {
                    if !members.contains(end.as_str()) {
                        return Err(ConfigError::InvalidConfig(format!(
                            "edge {} -> {} of workflow '{}' references non-member '{}'",
                            edge.source, edge.destination, workflow.id, end
                        )));
                    }
                }
                if !edges.insert((edge.subtype, edge.source.as_str(), edge.destination.as_str())) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "workflow '{}' has duplicate {} edge {} -> {}",
                        workflow.id,
                        edge.subtype.as_str(),
                        edge.source,
                        edge.destination
                    )));
                }
            }
        }

        let mut task_ids = HashSet::new();
        let now = Utc::now();
        for task in &config.tasks {
            if task.id.is_empty() {
                return Err(ConfigError::MissingField("task id".into()));
            }
            if !task_ids.insert(task.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
            if !job_ids.contains(task.job.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}' references unknown job '{}'",
                    task.id, task.job
                )));
            }
            check_targets(&task.id, &task.devices, &task.pools)?;
            Trigger::from_spec(&task.trigger, now).map_err(|source| {
                ConfigError::InvalidTrigger {
                    task: task.id.clone(),
                    source,
                }
            })?;
        }

        Ok(())
    }
}
