// ABOUTME: Failure taxonomy for deployment errors parsed from tool output.
// ABOUTME: Logic defects never retry; environmental conditions back off and retry.

use regex::Regex;
use std::time::Duration;

/// What kind of failure a deployment error represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Template or authoring defect. Retrying cannot help.
    Logic,
    /// Transient platform condition. Retry candidate.
    Environmental,
    /// Neither pattern family matched. Treated as non-retryable.
    Unknown,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logic => "logic",
            Self::Environmental => "environmental",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computed retry decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    pub should_retry: bool,
    pub delay: Duration,
    pub max_attempts: u32,
    pub next_attempt: u32,
}

const BASE_DELAY_SECS: u64 = 5;
const MAX_DELAY_SECS: u64 = 300;
const MAX_ATTEMPTS: u32 = 5;

/// Patterns identifying authoring defects in template or parameters.
/// Checked before environmental patterns; a match here wins outright.
const LOGIC_PATTERNS: &[&str] = &[
    r"(?i)\bBCP\d+\b",
    r"(?i)invalid\s+template",
    r"(?i)template\s+validation\s+(error|failed)",
    r"(?i)invalid\s+parameter",
    r"(?i)InvalidTemplateDeployment",
    r"(?i)circular\s+dependenc",
    r"(?i)(api\s*version\s+\S+\s+is\s+not\s+supported|NoRegisteredProviderFound|InvalidApiVersion)",
    r"(?i)(LocationNotAvailableForResourceType|is\s+not\s+available\s+in\s+location)",
    r"(?i)(AuthorizationFailed|does\s+not\s+have\s+authorization|RoleAssignmentExists)",
    r"(?i)(InvalidResourceName|name\s+.{0,40}(is\s+not\s+valid|violates\s+naming))",
];

/// Patterns identifying transient platform conditions worth retrying.
const ENVIRONMENTAL_PATTERNS: &[&str] = &[
    r"(?i)time[d]?\s*out",
    r"(?i)timeout",
    r"(?i)throttl",
    r"(?i)(TooManyRequests|rate\s*limit|\b429\b)",
    r"(?i)(ServiceUnavailable|service\s+is\s+unavailable|\b503\b)",
    r"(?i)temporarily\s+unavailable",
    r"(?i)(QuotaExceeded|quota\s+exceeded)",
    r"(?i)(insufficient\s+capacity|OverconstrainedAllocation)",
    r"(?i)(SkuNotAvailable|sku\s+.{0,40}not\s+(currently\s+)?available)",
    r"(?i)(not\s+available\s+in\s+(the\s+)?region|region\s+.{0,40}unavailable)",
    r"(?i)(another\s+operation\s+is\s+in\s+progress|conflicting\s+operation|OperationConflict)",
];

/// Classifies raw deployment error text into a failure taxonomy and
/// computes backoff strategy for retryable failures.
pub struct FailureClassifier {
    logic: Vec<Regex>,
    environmental: Vec<Regex>,
}

impl FailureClassifier {
    pub fn new() -> Self {
        // Pattern tables are compile-time constants; a bad pattern is a
        // programming error caught by the classifier tests.
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("failure pattern must be a valid regex"))
                .collect()
        };
        Self {
            logic: compile(LOGIC_PATTERNS),
            environmental: compile(ENVIRONMENTAL_PATTERNS),
        }
    }

    /// Assign a failure type to raw error text.
    ///
    /// Logic patterns take strict precedence: text matching both families
    /// classifies as `Logic`. When neither family matches, the exit code is
    /// consulted as a weak fallback.
    pub fn classify(&self, error_text: &str, exit_code: Option<i32>) -> FailureType {
        if error_text.trim().is_empty() {
            return FailureType::Unknown;
        }

        if self.logic.iter().any(|re| re.is_match(error_text)) {
            return FailureType::Logic;
        }

        if self.environmental.iter().any(|re| re.is_match(error_text)) {
            return FailureType::Environmental;
        }

        match exit_code {
            Some(1) => {
                let lower = error_text.to_lowercase();
                if ["invalid", "error", "failed"]
                    .iter()
                    .any(|s| lower.contains(s))
                {
                    FailureType::Logic
                } else {
                    FailureType::Unknown
                }
            }
            Some(code) if code > 100 => FailureType::Environmental,
            _ => FailureType::Unknown,
        }
    }

    /// True iff the failure type is worth retrying at all.
    pub fn should_retry(&self, failure: FailureType) -> bool {
        failure == FailureType::Environmental
    }

    /// Backoff strategy for the given zero-based attempt number.
    ///
    /// Delays double from 5s, capped at 300s; retries stop after 5 attempts.
    /// Non-retryable failures get a zeroed strategy.
    pub fn retry_strategy(&self, failure: FailureType, attempt: u32) -> RetryStrategy {
        if !self.should_retry(failure) {
            return RetryStrategy {
                should_retry: false,
                delay: Duration::ZERO,
                max_attempts: 0,
                next_attempt: attempt + 1,
            };
        }

        let delay_secs = BASE_DELAY_SECS
            .saturating_mul(1u64 << attempt.min(63))
            .min(MAX_DELAY_SECS);

        RetryStrategy {
            should_retry: attempt < MAX_ATTEMPTS,
            delay: Duration::from_secs(delay_secs),
            max_attempts: MAX_ATTEMPTS,
            next_attempt: attempt + 1,
        }
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}
