// ABOUTME: Health checker that queries a resource's provisioning state.
// ABOUTME: Shells out to `az resource show` and maps the state to a status.

use super::{HealthCheckResult, HealthChecker, HealthStatus};
use crate::process::{CommandRunner, ProcessError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const RESOURCE_SHOW_TIMEOUT: Duration = Duration::from_secs(30);

/// Probes a deployed resource via the toolchain CLI.
pub struct AzureResourceHealthChecker {
    name: String,
    resource_id: String,
    runner: Arc<dyn CommandRunner>,
    tool: String,
}

impl AzureResourceHealthChecker {
    pub fn new(
        resource_id: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
        tool: impl Into<String>,
    ) -> Self {
        let resource_id = resource_id.into();
        Self {
            name: format!("resource:{resource_id}"),
            resource_id,
            runner,
            tool: tool.into(),
        }
    }

    fn map_provisioning_state(&self, state: &str) -> (HealthStatus, String) {
        match state {
            "Succeeded" => (
                HealthStatus::Healthy,
                format!("{} provisioned", self.resource_id),
            ),
            "Creating" | "Updating" => (
                HealthStatus::Degraded,
                format!("{} still provisioning ({state})", self.resource_id),
            ),
            other => (
                HealthStatus::Unhealthy,
                format!("{} in provisioning state {other}", self.resource_id),
            ),
        }
    }
}

#[async_trait]
impl HealthChecker for AzureResourceHealthChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthCheckResult {
        let args: Vec<String> = ["resource", "show", "--ids", self.resource_id.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let output = match self.runner.run(&self.tool, &args, RESOURCE_SHOW_TIMEOUT).await {
            Ok(output) => output,
            Err(ProcessError::TimedOut(secs)) => {
                return HealthCheckResult::new(
                    &self.name,
                    HealthStatus::Unhealthy,
                    format!("resource query timed out after {secs}s"),
                );
            }
            Err(e) => {
                return HealthCheckResult::new(
                    &self.name,
                    HealthStatus::Unknown,
                    "resource query could not run",
                )
                .with_detail("error", e.to_string());
            }
        };

        if !output.success() {
            return HealthCheckResult::new(
                &self.name,
                HealthStatus::Unhealthy,
                "resource query failed",
            )
            .with_detail("stderr", output.stderr.trim().to_string());
        }

        let parsed: serde_json::Value = match serde_json::from_str(&output.stdout) {
            Ok(value) => value,
            Err(e) => {
                return HealthCheckResult::new(
                    &self.name,
                    HealthStatus::Unknown,
                    "resource query returned unparseable output",
                )
                .with_detail("error", e.to_string());
            }
        };

        match parsed
            .pointer("/properties/provisioningState")
            .and_then(|v| v.as_str())
        {
            Some(state) => {
                let (status, message) = self.map_provisioning_state(state);
                HealthCheckResult::new(&self.name, status, message)
                    .with_detail("provisioning_state", state.to_string())
            }
            None => HealthCheckResult::new(
                &self.name,
                HealthStatus::Unknown,
                "resource has no provisioningState property",
            ),
        }
    }
}
