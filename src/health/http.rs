// ABOUTME: HTTP GET health checker.
// ABOUTME: Expected status is healthy, error responses unhealthy, other mismatches degraded.

use super::{HealthCheckResult, HealthChecker, HealthStatus};
use async_trait::async_trait;
use std::time::Duration;

/// Probes a URL with a GET request and compares the response status.
pub struct HttpHealthChecker {
    name: String,
    url: String,
    expected_status: u16,
    client: reqwest::Client,
}

impl HttpHealthChecker {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built with the given timeout.
    pub fn new(
        url: impl Into<String>,
        expected_status: u16,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let url = url.into();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: format!("http:{url}"),
            url,
            expected_status,
            client,
        })
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthCheckResult {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == self.expected_status {
                    HealthCheckResult::new(
                        &self.name,
                        HealthStatus::Healthy,
                        format!("{} returned {status}", self.url),
                    )
                } else if status >= 400 {
                    HealthCheckResult::new(
                        &self.name,
                        HealthStatus::Unhealthy,
                        format!(
                            "{} returned error status {status}, expected {}",
                            self.url, self.expected_status
                        ),
                    )
                    .with_detail("status", status.to_string())
                } else {
                    // The endpoint responded, just not with what we expect.
                    HealthCheckResult::new(
                        &self.name,
                        HealthStatus::Degraded,
                        format!(
                            "{} returned {status}, expected {}",
                            self.url, self.expected_status
                        ),
                    )
                    .with_detail("status", status.to_string())
                }
            }
            Err(e) => HealthCheckResult::new(
                &self.name,
                HealthStatus::Unhealthy,
                format!("request to {} failed", self.url),
            )
            .with_detail("error", e.to_string()),
        }
    }
}
