//! Device driver seam.
//!
//! The run engine never talks to devices itself: every service names a
//! driver, and the driver turns one request into a success flag plus a
//! structured output. Connection handling, protocols and credentials are the
//! driver's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::device::Device;
use crate::core::types::{JobId, Runtime};

use super::command::CommandDriver;
use super::logs::RunLogger;

/// Errors a driver can report for one device.
///
/// These never abort a run: the engine records them as a failed result for
/// the device concerned.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver could not reach the device.
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// The call did not finish in time.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The command ran and reported failure.
    #[error("command failed with exit code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// The command could not be started.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The service has no command for a driver that needs one.
    #[error("service '{0}' has no command")]
    MissingCommand(String),

    /// No driver is registered under that name.
    #[error("unknown driver: {0}")]
    UnknownDriver(String),
}

/// One unit of device work.
#[derive(Debug, Clone)]
pub struct DriverRequest {
    pub job_id: JobId,
    pub job_name: String,
    pub runtime: Runtime,
    /// `None` for deviceless services.
    pub device: Option<Device>,
    pub command: Option<String>,
    pub parameters: Map<String, Value>,
    /// Payload of the run so far, including upstream results in a workflow.
    pub payload: Map<String, Value>,
    pub logger: RunLogger,
}

impl DriverRequest {
    /// Expand `{name}`, `{ip_address}` and `{runtime}` in a template.
    pub fn substitute(&self, template: &str) -> String {
        let mut rendered = template.replace("{runtime}", self.runtime.as_str());
        if let Some(device) = &self.device {
            rendered = rendered
                .replace("{name}", &device.name)
                .replace("{ip_address}", &device.ip_address);
        }
        rendered
    }
}

/// What a driver produced for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverOutput {
    pub success: bool,
    pub output: Value,
}

impl DriverOutput {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
        }
    }

    pub fn failure(output: Value) -> Self {
        Self {
            success: false,
            output,
        }
    }

    /// Convert a driver error into a failed output.
    pub fn from_error(error: &DriverError) -> Self {
        Self::failure(json!({ "error": error.to_string() }))
    }
}

/// A pluggable device driver.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Registry key of this driver.
    fn name(&self) -> &str;

    /// Execute one request. Implementations enforce their own timeouts.
    async fn execute(&self, request: &DriverRequest) -> Result<DriverOutput, DriverError>;
}

/// Driver that does nothing and echoes its request.
#[derive(Debug, Clone, Default)]
pub struct NoopDriver;

#[async_trait]
impl DeviceDriver for NoopDriver {
    fn name(&self) -> &str {
        "noop"
    }

    async fn execute(&self, request: &DriverRequest) -> Result<DriverOutput, DriverError> {
        let device = request.device.as_ref().map(|d| d.name.clone());
        Ok(DriverOutput::success(json!({
            "device": device,
            "command": request.command.as_deref().map(|c| request.substitute(c)),
            "parameters": request.parameters,
        })))
    }
}

/// Drivers by name.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DeviceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `command` and `noop` drivers.
    pub fn with_defaults(command_timeout: Option<Duration>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CommandDriver::new(command_timeout)));
        registry.register(Arc::new(NoopDriver));
        registry
    }

    /// Register a driver under its own name, replacing any previous one.
    pub fn register(&mut self, driver: Arc<dyn DeviceDriver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DeviceDriver>, DriverError> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::UnknownDriver(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
