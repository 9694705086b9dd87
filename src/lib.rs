pub mod automation;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod results;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use automation::{
    Automation, AutomationError, ErrorResponse, RestartOptions, RunOptions, RunResponse,
    TaskAction,
};
pub use config::{ConfigError, GlobalConfig, InventoryConfig, Platform, YamlLoader};
pub use core::catalog::{Catalog, CatalogError};
pub use core::device::{Device, Pool};
pub use core::job::{Job, JobStatus, JobType, Service};
pub use core::task::Task;
pub use core::trigger::{FrequencyUnit, Trigger, TriggerError, TriggerSpec};
pub use core::types::{DeviceId, JobId, PoolId, Runtime, ScheduleId, TaskId};
pub use core::workflow::{EdgeSubtype, Workflow, WorkflowEdge, WorkflowError};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    DeviceDriver, DriverError, DriverOutput, DriverRegistry, DriverRequest, EngineError,
    RunEngine, RunOutcome, RunRequest,
};
pub use results::{Comparison, ResultSource, ResultsError};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle};
pub use storage::{InMemoryStorage, Storage, StorageError};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
