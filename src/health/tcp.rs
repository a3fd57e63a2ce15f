// ABOUTME: TCP connect health checker.
// ABOUTME: A completed connect means healthy; refusal or timeout means unhealthy.

use super::{HealthCheckResult, HealthChecker, HealthStatus};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Probes a host/port by attempting a raw socket connect.
pub struct TcpHealthChecker {
    name: String,
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpHealthChecker {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        let host = host.into();
        Self {
            name: format!("tcp:{host}:{port}"),
            host,
            port,
            timeout,
        }
    }
}

#[async_trait]
impl HealthChecker for TcpHealthChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthCheckResult {
        let addr = format!("{}:{}", self.host, self.port);

        match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => HealthCheckResult::new(
                &self.name,
                HealthStatus::Healthy,
                format!("connected to {addr}"),
            ),
            Ok(Err(e)) => HealthCheckResult::new(
                &self.name,
                HealthStatus::Unhealthy,
                format!("connection to {addr} failed"),
            )
            .with_detail("error", e.to_string()),
            Err(_) => HealthCheckResult::new(
                &self.name,
                HealthStatus::Unhealthy,
                format!(
                    "connection to {addr} timed out after {}s",
                    self.timeout.as_secs()
                ),
            ),
        }
    }
}
