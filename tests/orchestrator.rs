// ABOUTME: End-to-end pipeline tests against a scripted toolchain runner.
// ABOUTME: Covers the confirmation gate, retry policy, and health failure paths.

mod support;

use skopos::audit::{AuditLogger, AuditRecord};
use skopos::config::DeploymentConfig;
use skopos::orchestrator::DeploymentOrchestrator;
use skopos::state::DeploymentState;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use support::{FakeAz, ScriptedPrompt, SharedPrompt, apply_output_with_id, resource_show_output};

use support::Resp;

const SITE_ID: &str =
    "/subscriptions/s/resourceGroups/rg-test/providers/Microsoft.Web/sites/api";

fn write_template(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("main.bicep");
    std::fs::write(&path, "param location string\n").expect("write template");
    path
}

fn config(template: &Path, audit_dir: &Path) -> DeploymentConfig {
    let mut config = DeploymentConfig::new("rg-test", template);
    config.audit_dir = audit_dir.to_path_buf();
    config
}

fn orchestrator(
    config: DeploymentConfig,
    az: Arc<FakeAz>,
) -> DeploymentOrchestrator {
    let audit = AuditLogger::with_file_backend(&config.audit_dir).expect("audit logger");
    DeploymentOrchestrator::new(config, az, audit)
}

/// Load the single record a run persisted.
fn persisted_record(audit_dir: &Path) -> AuditRecord {
    let logger = AuditLogger::with_file_backend(audit_dir).expect("audit logger");
    let mut records = logger.list_records(10).expect("list");
    assert_eq!(records.len(), 1, "exactly one record per run");
    records.remove(0)
}

fn events_of_type<'a>(record: &'a AuditRecord, event_type: &str) -> Vec<&'a skopos::audit::AuditEvent> {
    record
        .events
        .iter()
        .filter(|e| e.event_type == event_type)
        .collect()
}

/// Test: a declined destructive plan aborts before any apply call.
#[tokio::test]
async fn declined_destructive_plan_aborts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);
    let audit_dir = dir.path().join("audit");

    let az = Arc::new(FakeAz::new());
    az.push_lint(Resp::ok("{}"));
    az.push_whatif(Resp::ok("- Delete Microsoft.Web/sites/legacy\n"));

    let prompt = Arc::new(ScriptedPrompt::new(false));
    let mut orch = orchestrator(config(&template, &audit_dir), az.clone())
        .with_prompt(Box::new(SharedPrompt(prompt.clone())));

    let outcome = orch.deploy().await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("declined"));
    assert_eq!(orch.current_state(), DeploymentState::Failed);
    assert_eq!(prompt.times_asked(), 1);
    assert_eq!(az.calls_containing("create"), 0);

    let record = persisted_record(&audit_dir);
    assert_eq!(events_of_type(&record, "awaiting_confirmation").len(), 1);
    assert_eq!(events_of_type(&record, "confirmation_declined").len(), 1);
    assert!(!record.result.as_ref().expect("result").success);
}

/// Test: a confirmed destructive plan proceeds to apply.
#[tokio::test]
async fn confirmed_destructive_plan_proceeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);
    let audit_dir = dir.path().join("audit");

    let az = Arc::new(FakeAz::new());
    az.push_lint(Resp::ok("{}"));
    az.push_whatif(Resp::ok("- Delete Microsoft.Web/sites/legacy\n"));
    az.push_create(Resp::ok(apply_output_with_id(SITE_ID)));

    let prompt = Arc::new(ScriptedPrompt::new(true));
    let mut config = config(&template, &audit_dir);
    config.skip_health_checks = true;
    let mut orch =
        orchestrator(config, az.clone()).with_prompt(Box::new(SharedPrompt(prompt.clone())));

    let outcome = orch.deploy().await;
    assert!(outcome.success);
    assert_eq!(outcome.message, "Deployment completed successfully");
    assert_eq!(orch.current_state(), DeploymentState::Completed);
    assert_eq!(prompt.times_asked(), 1);
    assert_eq!(az.calls_containing("create"), 1);

    let record = persisted_record(&audit_dir);
    assert_eq!(events_of_type(&record, "confirmation_granted").len(), 1);
}

/// Test: environmental failures back off and retry; two failures then
/// success still counts as a successful run with a full audit trail.
#[tokio::test(start_paused = true)]
async fn environmental_failures_retry_to_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);
    let audit_dir = dir.path().join("audit");

    let az = Arc::new(FakeAz::new());
    az.push_lint(Resp::ok("{}"));
    az.push_whatif(Resp::ok("+ Create Microsoft.Web/sites/api\n"));
    az.push_create(Resp::fail(1, "ServiceUnavailable: please retry"));
    az.push_create(Resp::fail(1, "ServiceUnavailable: please retry"));
    az.push_create(Resp::ok(apply_output_with_id(SITE_ID)));

    let mut config = config(&template, &audit_dir);
    config.skip_health_checks = true;
    let mut orch = orchestrator(config, az.clone());

    let outcome = orch.deploy().await;
    assert!(outcome.success, "message: {}", outcome.message);
    assert_eq!(outcome.message, "Deployment completed successfully");
    assert_eq!(az.calls_containing("create"), 3);

    let record = persisted_record(&audit_dir);
    let failures = events_of_type(&record, "deploy_attempt_failed");
    assert_eq!(failures.len(), 2);
    for (i, event) in failures.iter().enumerate() {
        let details = event.details.as_ref().expect("details");
        assert_eq!(details["attempt"], serde_json::json!(i + 1));
        assert_eq!(details["classification"], serde_json::json!("environmental"));
    }
    assert_eq!(events_of_type(&record, "deploy_succeeded").len(), 1);
    assert_eq!(record.resources.len(), 1);
    assert_eq!(record.resources[0].resource_id, SITE_ID);
    assert_eq!(record.resources[0].resource_type, "Microsoft.Web/sites");
}

/// Test: persistent environmental failures exhaust the attempt limit.
#[tokio::test(start_paused = true)]
async fn environmental_failures_exhaust_attempts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);
    let audit_dir = dir.path().join("audit");

    let az = Arc::new(FakeAz::new());
    az.push_lint(Resp::ok("{}"));
    az.push_whatif(Resp::ok("+ Create Microsoft.Web/sites/api\n"));
    for _ in 0..3 {
        az.push_create(Resp::fail(1, "request was throttled, try again later"));
    }

    let mut orch = orchestrator(config(&template, &audit_dir), az.clone());

    let outcome = orch.deploy().await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("environmental"));
    assert_eq!(orch.current_state(), DeploymentState::Failed);
    assert_eq!(az.calls_containing("create"), 3);

    let record = persisted_record(&audit_dir);
    assert_eq!(events_of_type(&record, "deploy_attempt_failed").len(), 3);
    assert!(events_of_type(&record, "deploy_succeeded").is_empty());
}

/// Test: a logic failure aborts after a single attempt.
#[tokio::test]
async fn logic_failure_aborts_immediately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);
    let audit_dir = dir.path().join("audit");

    let az = Arc::new(FakeAz::new());
    az.push_lint(Resp::ok("{}"));
    az.push_whatif(Resp::ok("+ Create Microsoft.Web/sites/api\n"));
    az.push_create(Resp::fail(1, "InvalidTemplateDeployment: template is malformed"));

    let mut orch = orchestrator(config(&template, &audit_dir), az.clone());

    let outcome = orch.deploy().await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("logic"));
    assert!(outcome.message.contains("InvalidTemplateDeployment"));
    assert_eq!(az.calls_containing("create"), 1);
    assert_eq!(orch.current_state(), DeploymentState::Failed);
}

/// Test: a missing template fails validation before any tool call.
#[tokio::test]
async fn missing_template_fails_validation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let audit_dir = dir.path().join("audit");

    let az = Arc::new(FakeAz::new());
    let mut orch = orchestrator(
        config(Path::new("/nope/main.bicep"), &audit_dir),
        az.clone(),
    );

    let outcome = orch.deploy().await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("template file not found"));
    assert_eq!(orch.current_state(), DeploymentState::Failed);
    assert_eq!(az.total_calls(), 0);

    let record = persisted_record(&audit_dir);
    assert_eq!(events_of_type(&record, "deployment_failed").len(), 1);
}

/// Test: lint errors are fatal and never reach the plan phase.
#[tokio::test]
async fn lint_errors_are_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);
    let audit_dir = dir.path().join("audit");

    let az = Arc::new(FakeAz::new());
    az.push_lint(Resp::fail(1, "Error BCP057: undefined symbol\n"));

    let mut orch = orchestrator(config(&template, &audit_dir), az.clone());

    let outcome = orch.deploy().await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("BCP057"));
    assert_eq!(az.calls_containing("what-if"), 0);
    assert_eq!(orch.current_state(), DeploymentState::Failed);
}

/// Test: warnings fail the run unless allowed; allowed warnings proceed.
#[tokio::test]
async fn lint_warnings_respect_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);

    let warning = Resp::Output {
        exit_code: 0,
        stdout: String::new(),
        stderr: "Warning BCP081: resource type does not have types available\n".to_string(),
    };

    // Rejected by default.
    let audit_dir = dir.path().join("audit-strict");
    let az = Arc::new(FakeAz::new());
    az.push_lint(warning.clone());
    let mut orch = orchestrator(config(&template, &audit_dir), az.clone());
    let outcome = orch.deploy().await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("warnings"));
    assert_eq!(az.calls_containing("what-if"), 0);

    // Allowed when configured.
    let audit_dir = dir.path().join("audit-lenient");
    let az = Arc::new(FakeAz::new());
    az.push_lint(warning);
    az.push_whatif(Resp::ok("+ Create Microsoft.Web/sites/api\n"));
    az.push_create(Resp::ok(apply_output_with_id(SITE_ID)));
    let mut config = config(&template, &audit_dir);
    config.allow_warnings = true;
    config.skip_health_checks = true;
    let mut orch = orchestrator(config, az);
    let outcome = orch.deploy().await;
    assert!(outcome.success, "message: {}", outcome.message);
}

/// Test: an unhealthy resource after apply is a failed run that still
/// records the deployed resource and its verified health.
#[tokio::test]
async fn health_failure_is_partial_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);
    let audit_dir = dir.path().join("audit");

    let az = Arc::new(FakeAz::new());
    az.push_lint(Resp::ok("{}"));
    az.push_whatif(Resp::ok("+ Create Microsoft.Web/sites/api\n"));
    az.push_create(Resp::ok(apply_output_with_id(SITE_ID)));
    az.push_show(Resp::ok(resource_show_output("Failed")));
    az.push_show(Resp::ok(resource_show_output("Failed")));

    let mut orch = orchestrator(config(&template, &audit_dir), az.clone())
        .with_health_retry(2, Duration::from_millis(1));

    let outcome = orch.deploy().await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("deployed"));
    assert!(outcome.message.contains("verification"));
    assert_eq!(orch.current_state(), DeploymentState::Failed);

    let record = persisted_record(&audit_dir);
    assert_eq!(events_of_type(&record, "deploy_succeeded").len(), 1);
    assert_eq!(events_of_type(&record, "health_failed").len(), 1);
    assert_eq!(record.resources.len(), 1);
    assert_eq!(record.resources[0].health_status.as_deref(), Some("unhealthy"));
}

/// Test: a healthy resource completes the run with its health recorded.
#[tokio::test]
async fn healthy_resources_complete_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);
    let audit_dir = dir.path().join("audit");

    let az = Arc::new(FakeAz::new());
    az.push_lint(Resp::ok("{}"));
    az.push_whatif(Resp::ok("+ Create Microsoft.Web/sites/api\n"));
    az.push_create(Resp::ok(apply_output_with_id(SITE_ID)));
    az.push_show(Resp::ok(resource_show_output("Succeeded")));

    let mut orch = orchestrator(config(&template, &audit_dir), az.clone())
        .with_health_retry(2, Duration::from_millis(1));

    let outcome = orch.deploy().await;
    assert!(outcome.success, "message: {}", outcome.message);
    assert_eq!(orch.current_state(), DeploymentState::Completed);

    let record = persisted_record(&audit_dir);
    assert_eq!(events_of_type(&record, "health_verified").len(), 1);
    assert_eq!(record.resources[0].health_status.as_deref(), Some("healthy"));
    assert!(record.result.as_ref().expect("result").success);
}

/// Test: the displayed failure message is truncated while the audit
/// record keeps the full text.
#[tokio::test]
async fn long_failure_messages_truncate_for_display_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let template = write_template(&dir);
    let audit_dir = dir.path().join("audit");

    let long_error = format!("Invalid template: {}", "x".repeat(800));
    let az = Arc::new(FakeAz::new());
    az.push_lint(Resp::ok("{}"));
    az.push_whatif(Resp::ok("+ Create Microsoft.Web/sites/api\n"));
    az.push_create(Resp::fail(1, long_error.clone()));

    let mut orch = orchestrator(config(&template, &audit_dir), az);

    let outcome = orch.deploy().await;
    assert!(!outcome.success);
    assert_eq!(outcome.message.chars().count(), 500);

    let record = persisted_record(&audit_dir);
    let result = record.result.as_ref().expect("result");
    assert!(result.message.len() > 500);
    assert!(result.message.contains(&long_error));
}
