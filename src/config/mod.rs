//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the inventory (devices,
//! pools, services, workflows and tasks) and global settings.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{
    InventoryBuilder, Platform, load_inventory_from_directory, open_schedule_store, open_storage,
};
pub use error::ConfigError;
pub use types::{
    CommandDriverConfig, CriterionConfig, DeviceConfig, DriversConfig, EdgeConfig, GlobalConfig,
    InventoryConfig, PoolConfig, SchedulerConfig, ServiceConfig, StorageConfig, TaskConfig,
    WorkflowConfig,
};
pub use yaml::YamlLoader;
