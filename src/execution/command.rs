//! Local command driver.
//!
//! [`CommandDriver`] runs a service's command template as a local process,
//! once per target device. The template is split on whitespace after
//! substitution and executed without a shell, so pipes and redirections are
//! not interpreted.
//!
//! ```ignore
//! # use netrun::core::job::Service;
//! let mut service = Service::new("command");
//! service.command = Some("ping -c 1 {ip_address}".into());
//! ```
//!
//! # Timeout Handling
//!
//! When a timeout is configured and the process does not finish in time, the
//! device result is a failure carrying [`DriverError::Timeout`]. The child
//! process is killed when the pending output future is dropped.
//!
//! # Output
//!
//! A successful call produces `{"command": <expanded>, "result": <stdout>}`.
//! A non-zero exit status is reported as [`DriverError::CommandFailed`] with
//! the captured stderr.

use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::driver::{DeviceDriver, DriverError, DriverOutput, DriverRequest};

/// Driver that runs a local command per device.
#[derive(Debug, Clone, Default)]
pub struct CommandDriver {
    timeout: Option<Duration>,
}

impl CommandDriver {
    /// Create a driver with an optional per-call timeout.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl DeviceDriver for CommandDriver {
    fn name(&self) -> &str {
        "command"
    }

    async fn execute(&self, request: &DriverRequest) -> Result<DriverOutput, DriverError> {
        let template = request
            .command
            .as_deref()
            .ok_or_else(|| DriverError::MissingCommand(request.job_name.clone()))?;
        let command = request.substitute(template);
        let device = request.device.as_ref().map(|d| d.name.as_str());
        request
            .logger
            .info(device, &format!("Running UNIX command: {}", command));

        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| DriverError::MissingCommand(request.job_name.clone()))?;

        let mut cmd = Command::new(program);
        cmd.args(parts);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = match self.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| DriverError::Timeout(duration))?
                .map_err(|e| DriverError::ExecutionFailed(e.to_string()))?,
            None => cmd
                .output()
                .await
                .map_err(|e| DriverError::ExecutionFailed(e.to_string()))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(DriverOutput::success(json!({
                "command": command,
                "result": stdout,
            })))
        } else {
            Err(DriverError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}
