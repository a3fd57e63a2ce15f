// ABOUTME: The five-phase deployment driver: validate, lint, plan, apply, verify.
// ABOUTME: Drives the state machine and audit record in lock-step; nothing escapes deploy().

use crate::audit::{AuditLogger, AuditRecord};
use crate::classify::{FailureClassifier, FailureType};
use crate::config::DeploymentConfig;
use crate::health::{AzureResourceHealthChecker, HealthVerifier};
use crate::lint::{BicepLinter, LintError};
use crate::plan::{PlanRequest, WhatIfPlanner};
use crate::process::{AZ_CLI, CommandRunner};
use crate::state::{DeploymentState, DeploymentStateMachine, TransitionRejected};
use chrono::Utc;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEPLOY_TIMEOUT: Duration = Duration::from_secs(1800);
const MAX_DEPLOY_ATTEMPTS: u32 = 3;
const DISPLAY_MESSAGE_LIMIT: usize = 500;
const SUCCESS_MESSAGE: &str = "Deployment completed successfully";

/// Final verdict of one `deploy()` call.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub success: bool,
    pub message: String,
}

/// Blocking yes/no gate for destructive changes.
pub trait ConfirmationPrompt: Send + Sync {
    /// Ask the question and block until an answer arrives. Only "y" and
    /// "yes" (case-insensitive) are affirmative.
    fn confirm(&self, question: &str) -> std::io::Result<bool>;
}

/// Interactive prompt on stdin/stdout.
pub struct StdinPrompt;

impl ConfirmationPrompt for StdinPrompt {
    fn confirm(&self, question: &str) -> std::io::Result<bool> {
        print!("{question} [y/N]: ");
        std::io::stdout().flush()?;

        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        let answer = answer.trim().to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }
}

/// Failure of one pipeline phase. Internal: `deploy()` converts every
/// variant into a failed outcome.
#[derive(Debug, thiserror::Error)]
enum PhaseError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("lint failed: {0}")]
    Lint(String),

    #[error("lint produced warnings and warnings are not allowed: {0}")]
    LintWarnings(String),

    #[error("what-if analysis failed: {0}")]
    Plan(String),

    #[error("deployment declined: destructive changes were not confirmed")]
    Declined,

    #[error("deployment failed ({classification}): {message}")]
    Deploy {
        classification: FailureType,
        message: String,
    },

    #[error("health verification failed: {0}")]
    Health(String),

    // A rejected transition mid-run is a pipeline bug; it still converges
    // on a failed outcome rather than a panic.
    #[error("state machine rejected transition: {0}")]
    State(#[from] TransitionRejected),
}

/// Coordinates one deployment run end to end.
///
/// Designed for exactly one `deploy()` call per instance: the state
/// machine ends in a terminal state and a second call would be rejected
/// at its first transition.
pub struct DeploymentOrchestrator {
    config: DeploymentConfig,
    runner: Arc<dyn CommandRunner>,
    tool: String,
    classifier: FailureClassifier,
    audit: AuditLogger,
    machine: DeploymentStateMachine,
    prompt: Box<dyn ConfirmationPrompt>,
    health_retries: u32,
    health_retry_delay: Duration,
}

impl DeploymentOrchestrator {
    pub fn new(config: DeploymentConfig, runner: Arc<dyn CommandRunner>, audit: AuditLogger) -> Self {
        Self {
            config,
            runner,
            tool: AZ_CLI.to_string(),
            classifier: FailureClassifier::new(),
            audit,
            machine: DeploymentStateMachine::new(),
            prompt: Box::new(StdinPrompt),
            health_retries: 3,
            health_retry_delay: Duration::from_secs(10),
        }
    }

    /// Override the toolchain binary name.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    /// Replace the interactive confirmation gate.
    pub fn with_prompt(mut self, prompt: Box<dyn ConfirmationPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Tune the health verifier's retry behavior.
    pub fn with_health_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.health_retries = retries;
        self.health_retry_delay = delay;
        self
    }

    pub fn current_state(&self) -> DeploymentState {
        self.machine.current()
    }

    /// Run the full pipeline.
    ///
    /// Every failure path converges on a `DeployOutcome` with the state
    /// machine in `Failed`; no error crosses this boundary. The audit
    /// record is persisted exactly once, on the way out.
    pub async fn deploy(&mut self) -> DeployOutcome {
        let mut record = self.audit.create_record(
            self.config.git_sha.clone(),
            Some(self.config.template_path.clone()),
            self.config.parameters_path.clone(),
        );

        info!(
            deployment_id = %record.deployment_id,
            resource_group = %self.config.resource_group,
            "starting deployment"
        );

        let outcome = match self.run(&mut record).await {
            Ok(()) => {
                record.set_result(true, SUCCESS_MESSAGE, None);
                info!(deployment_id = %record.deployment_id, "deployment completed");
                DeployOutcome {
                    success: true,
                    message: SUCCESS_MESSAGE.to_string(),
                }
            }
            Err(e) => {
                let full_message = e.to_string();
                if let Err(rejected) = self.machine.transition_to(
                    DeploymentState::Failed,
                    Some(metadata(json!({ "error": full_message }))),
                ) {
                    debug!(%rejected, "failure transition not applied");
                }
                record.add_event(
                    "deployment_failed",
                    &full_message,
                    Some(json!({ "state": self.machine.current().as_str() })),
                );
                record.set_result(false, &full_message, None);
                warn!(deployment_id = %record.deployment_id, error = %full_message, "deployment failed");
                DeployOutcome {
                    success: false,
                    message: truncate_for_display(&full_message),
                }
            }
        };

        // An audit persistence failure must not change the verdict.
        if let Err(e) = self.audit.save_record(&record) {
            warn!(error = %e, "failed to persist audit record");
        }

        outcome
    }

    async fn run(&mut self, record: &mut AuditRecord) -> Result<(), PhaseError> {
        self.validate_parameters(record)?;
        self.lint(record).await?;
        self.plan(record).await?;
        self.apply_with_retry(record).await?;
        self.verify_health(record).await?;
        Ok(())
    }

    // Phase 1: the template (and parameters file, when given) must exist.
    fn validate_parameters(&mut self, record: &mut AuditRecord) -> Result<(), PhaseError> {
        self.machine
            .transition_to(DeploymentState::ValidatingParameters, None)?;
        record.add_event("phase_validation", "validating input files", None);

        if !self.config.template_path.exists() {
            return Err(PhaseError::Validation(format!(
                "template file not found: {}",
                self.config.template_path.display()
            )));
        }

        if let Some(parameters) = &self.config.parameters_path {
            if !parameters.exists() {
                return Err(PhaseError::Validation(format!(
                    "parameters file not found: {}",
                    parameters.display()
                )));
            }
        }

        Ok(())
    }

    // Phase 2: lint errors are fatal and never retried; warnings are fatal
    // only when not allowed.
    async fn lint(&mut self, record: &mut AuditRecord) -> Result<(), PhaseError> {
        self.machine.transition_to(DeploymentState::Linting, None)?;
        record.add_event("phase_lint", "linting template", None);

        let linter = BicepLinter::new(self.runner.clone(), &self.tool);
        let result = linter
            .lint_file(&self.config.template_path)
            .await
            .map_err(|e| match e {
                LintError::TemplateNotFound(path) => {
                    PhaseError::Validation(format!("template file not found: {}", path.display()))
                }
                LintError::Process(e) => PhaseError::Lint(e.to_string()),
            })?;

        if !result.errors.is_empty() {
            let combined = result
                .errors
                .iter()
                .map(|d| {
                    if d.code.is_empty() {
                        d.message.clone()
                    } else {
                        format!("{}: {}", d.code, d.message)
                    }
                })
                .collect::<Vec<_>>()
                .join("; ");

            // Classified for the audit trail only; lint failures never retry.
            let classification = self.classifier.classify(&combined, None);
            record.add_event(
                "lint_failed",
                &combined,
                Some(json!({
                    "errors": result.errors.len(),
                    "warnings": result.warnings.len(),
                    "classification": classification.as_str(),
                })),
            );
            return Err(PhaseError::Lint(combined));
        }

        if !result.success(self.config.allow_warnings) {
            let combined = result
                .warnings
                .iter()
                .map(|d| format!("{}: {}", d.code, d.message))
                .collect::<Vec<_>>()
                .join("; ");
            record.add_event(
                "lint_warnings_rejected",
                &combined,
                Some(json!({ "warnings": result.warnings.len() })),
            );
            return Err(PhaseError::LintWarnings(combined));
        }

        record.add_event(
            "lint_passed",
            "template linted",
            Some(json!({ "warnings": result.warnings.len() })),
        );
        Ok(())
    }

    // Phase 3: dry run, with a blocking confirmation gate when the plan
    // deletes anything.
    async fn plan(&mut self, record: &mut AuditRecord) -> Result<(), PhaseError> {
        self.machine.transition_to(DeploymentState::Planning, None)?;
        record.add_event("phase_plan", "running what-if analysis", None);

        let planner = WhatIfPlanner::new(self.runner.clone(), &self.tool);
        let request = PlanRequest {
            resource_group: &self.config.resource_group,
            template: &self.config.template_path,
            parameters: self.config.parameters_path.as_deref(),
            location: self.config.location.as_deref(),
            overrides: &self.config.parameter_overrides,
        };

        let result = planner
            .analyze(&request)
            .await
            .map_err(|e| PhaseError::Plan(e.to_string()))?;

        let destructive = result.has_destructive_changes();
        record.add_event(
            "plan_completed",
            format!("{} change(s) predicted", result.changes.len()),
            Some(json!({
                "counts": result.counts(),
                "destructive": destructive,
            })),
        );

        if destructive && self.config.require_confirmation_for_deletes {
            self.machine
                .transition_to(DeploymentState::AwaitingConfirmation, None)?;

            let deletions: Vec<String> = result
                .changes
                .iter()
                .filter(|c| c.is_destructive())
                .map(|c| {
                    if c.resource_type.is_empty() {
                        c.resource_name.clone()
                    } else {
                        format!("{}/{}", c.resource_type, c.resource_name)
                    }
                })
                .collect();

            record.add_event(
                "awaiting_confirmation",
                format!("{} resource(s) would be deleted", deletions.len()),
                Some(json!({ "deletions": deletions })),
            );

            let question = format!(
                "This deployment will DELETE {} resource(s):\n  {}\nProceed?",
                deletions.len(),
                deletions.join("\n  ")
            );

            let confirmed = self.prompt.confirm(&question).unwrap_or(false);
            if !confirmed {
                record.add_event("confirmation_declined", "operator declined deletions", None);
                return Err(PhaseError::Declined);
            }
            record.add_event("confirmation_granted", "operator confirmed deletions", None);
        }

        Ok(())
    }

    // Phase 4: apply with failure-aware retry. Logic and unknown failures
    // abort immediately; environmental failures back off and retry up to
    // the outer attempt limit.
    async fn apply_with_retry(&mut self, record: &mut AuditRecord) -> Result<(), PhaseError> {
        self.machine.transition_to(DeploymentState::Deploying, None)?;

        let deployment_name = format!("aos-deploy-{}", Utc::now().format("%Y%m%d%H%M%S"));
        let args = self.build_apply_args(&deployment_name);

        let mut attempt: u32 = 0;
        loop {
            debug!(attempt = attempt + 1, deployment_name, "apply attempt");

            let (error_text, exit_code) =
                match self.runner.run(&self.tool, &args, DEPLOY_TIMEOUT).await {
                    Ok(output) if output.success() => {
                        let resources = discover_resource_ids(&output.stdout);
                        for id in &resources {
                            record.add_resource(id, resource_type_from_id(id), None, None);
                        }
                        record.add_event(
                            "deploy_succeeded",
                            format!(
                                "deployment {deployment_name} applied on attempt {}",
                                attempt + 1
                            ),
                            Some(json!({
                                "attempt": attempt + 1,
                                "resources": resources.len(),
                            })),
                        );
                        info!(
                            deployment_name,
                            resources = resources.len(),
                            "apply succeeded"
                        );
                        return Ok(());
                    }
                    Ok(output) => (output.combined_output(), output.exit_code),
                    Err(e) => (e.to_string(), None),
                };

            let classification = self.classifier.classify(&error_text, exit_code);
            record.add_event(
                "deploy_attempt_failed",
                &error_text,
                Some(json!({
                    "attempt": attempt + 1,
                    "classification": classification.as_str(),
                })),
            );
            warn!(
                attempt = attempt + 1,
                classification = %classification,
                error = %truncate_for_display(&error_text),
                "apply attempt failed"
            );

            let strategy = self.classifier.retry_strategy(classification, attempt);
            attempt += 1;

            if strategy.should_retry && attempt < MAX_DEPLOY_ATTEMPTS {
                info!(
                    delay_secs = strategy.delay.as_secs(),
                    next_attempt = attempt + 1,
                    "retrying after environmental failure"
                );
                tokio::time::sleep(strategy.delay).await;
                continue;
            }

            return Err(PhaseError::Deploy {
                classification,
                message: error_text,
            });
        }
    }

    // Phase 5: verify every discovered resource, or transition straight to
    // Completed when health checks are skipped.
    async fn verify_health(&mut self, record: &mut AuditRecord) -> Result<(), PhaseError> {
        if self.config.skip_health_checks {
            record.add_event("health_skipped", "health verification skipped by config", None);
            self.machine.transition_to(DeploymentState::Completed, None)?;
            return Ok(());
        }

        self.machine
            .transition_to(DeploymentState::VerifyingHealth, None)?;
        record.add_event(
            "phase_verify",
            format!("verifying {} resource(s)", record.resources.len()),
            None,
        );

        let resource_ids: Vec<String> = record
            .resources
            .iter()
            .map(|r| r.resource_id.clone())
            .collect();

        let mut verifier = HealthVerifier::with_retry(self.health_retries, self.health_retry_delay);
        for id in &resource_ids {
            verifier.register(Box::new(AzureResourceHealthChecker::new(
                id,
                self.runner.clone(),
                &self.tool,
            )));
        }

        let summary = verifier.verify_all().await;

        // Results come back in registration order, one per resource.
        for (id, result) in resource_ids.iter().zip(&summary.results) {
            record.set_resource_health(id, result.status.as_str());
        }

        if !summary.all_healthy {
            let unhealthy: Vec<&str> = summary
                .results
                .iter()
                .filter(|r| !r.is_healthy())
                .map(|r| r.check_name.as_str())
                .collect();
            let message = format!(
                "{} of {} resource(s) unhealthy after apply; infrastructure was deployed \
                 but failed verification: {}",
                unhealthy.len(),
                summary.results.len(),
                unhealthy.join(", ")
            );
            record.add_event(
                "health_failed",
                &message,
                Some(json!({ "unhealthy": unhealthy })),
            );
            return Err(PhaseError::Health(message));
        }

        record.add_event(
            "health_verified",
            format!("{} resource(s) healthy", summary.results.len()),
            None,
        );
        self.machine.transition_to(DeploymentState::Completed, None)?;
        Ok(())
    }

    fn build_apply_args(&self, deployment_name: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "deployment",
            "group",
            "create",
            "--name",
            deployment_name,
            "--resource-group",
            &self.config.resource_group,
            "--template-file",
            &self.config.template_path.to_string_lossy(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(parameters) = &self.config.parameters_path {
            args.push("--parameters".to_string());
            args.push(parameters.to_string_lossy().into_owned());
        }
        for (key, value) in &self.config.parameter_overrides {
            args.push("--parameters".to_string());
            args.push(format!("{key}={value}"));
        }

        args
    }
}

/// Truncate a message for display; the audit record keeps the full text.
pub fn truncate_for_display(message: &str) -> String {
    if message.chars().count() <= DISPLAY_MESSAGE_LIMIT {
        message.to_string()
    } else {
        message.chars().take(DISPLAY_MESSAGE_LIMIT).collect()
    }
}

/// Pull deployed resource IDs out of the apply command's JSON output.
///
/// Heuristic: any template output whose name contains "id" (any case) is
/// treated as a resource ID. Deliberately isolated here so a different
/// discovery rule can replace it without touching phase logic.
fn discover_resource_ids(stdout: &str) -> Vec<String> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(stdout) else {
        return Vec::new();
    };

    let Some(outputs) = parsed.pointer("/properties/outputs").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    let mut ids = Vec::new();
    for (key, value) in outputs {
        if !key.to_lowercase().contains("id") {
            continue;
        }
        let candidate = value
            .pointer("/value")
            .and_then(|v| v.as_str())
            .or_else(|| value.as_str());
        if let Some(id) = candidate {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Derive a provider-qualified type from a full resource ID path.
fn resource_type_from_id(resource_id: &str) -> String {
    let segments: Vec<&str> = resource_id.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(pos) = segments.iter().position(|s| s.eq_ignore_ascii_case("providers")) {
        if pos + 2 < segments.len() {
            return format!("{}/{}", segments[pos + 1], segments[pos + 2]);
        }
    }
    String::new()
}

fn metadata(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
