// ABOUTME: Post-deploy health verification with per-checker retry.
// ABOUTME: Checkers are polymorphic; the verifier never errors on unhealthy.

mod azure;
mod http;
mod tcp;

pub use azure::AzureResourceHealthChecker;
pub use http::HttpHealthChecker;
pub use tcp::TcpHealthChecker;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Health status reported by a checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one health check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthCheckResult {
    pub check_name: String,
    pub status: HealthStatus,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl HealthCheckResult {
    pub fn new(check_name: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            status,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// A single post-deploy health probe.
///
/// Checkers hold no state across calls; the verifier creates and discards
/// them per deployment.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> HealthCheckResult;
}

/// Summary of a verification pass over all registered checkers.
#[derive(Debug)]
pub struct VerifySummary {
    pub all_healthy: bool,
    pub results: Vec<HealthCheckResult>,
}

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Runs every registered checker sequentially, each through its own retry
/// loop.
pub struct HealthVerifier {
    checkers: Vec<Box<dyn HealthChecker>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl HealthVerifier {
    pub fn new() -> Self {
        Self {
            checkers: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            checkers: Vec::new(),
            max_retries,
            retry_delay,
        }
    }

    pub fn register(&mut self, checker: Box<dyn HealthChecker>) {
        self.checkers.push(checker);
    }

    pub fn checker_count(&self) -> usize {
        self.checkers.len()
    }

    /// Run all checkers in registration order.
    ///
    /// A persistently unhealthy resource yields its last result; this
    /// method never fails. `all_healthy` is the AND of every checker's
    /// final healthiness.
    pub async fn verify_all(&self) -> VerifySummary {
        let mut results = Vec::with_capacity(self.checkers.len());
        let mut all_healthy = true;

        for checker in &self.checkers {
            let result = self.check_with_retry(checker.as_ref()).await;
            if !result.is_healthy() {
                warn!(
                    check = result.check_name,
                    status = %result.status,
                    "health check did not pass"
                );
                all_healthy = false;
            }
            results.push(result);
        }

        VerifySummary {
            all_healthy,
            results,
        }
    }

    /// Retry loop for one checker: the first healthy result wins
    /// immediately; otherwise the last result is returned after
    /// `max_retries` attempts.
    async fn check_with_retry(&self, checker: &dyn HealthChecker) -> HealthCheckResult {
        let mut last = None;

        for attempt in 1..=self.max_retries.max(1) {
            let result = checker.check().await;
            debug!(
                check = checker.name(),
                attempt,
                status = %result.status,
                "health check attempt"
            );

            if result.is_healthy() {
                return result;
            }

            last = Some(result);
            if attempt < self.max_retries.max(1) {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        last.unwrap_or_else(|| {
            HealthCheckResult::new(checker.name(), HealthStatus::Unknown, "no check attempts ran")
        })
    }
}

impl Default for HealthVerifier {
    fn default() -> Self {
        Self::new()
    }
}
