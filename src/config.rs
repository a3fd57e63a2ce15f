// ABOUTME: Immutable per-run deployment configuration.
// ABOUTME: Assembled once from CLI arguments and handed to the orchestrator.

use std::path::PathBuf;

/// Everything one deployment run needs to know, fixed at construction.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub resource_group: String,
    pub location: Option<String>,
    pub template_path: PathBuf,
    pub parameters_path: Option<PathBuf>,
    /// Ordered `KEY=VALUE` parameter overrides, applied after the
    /// parameters file.
    pub parameter_overrides: Vec<(String, String)>,
    /// Lint warnings alone do not fail the run when set.
    pub allow_warnings: bool,
    /// Gate the apply behind an interactive prompt when the plan deletes
    /// anything.
    pub require_confirmation_for_deletes: bool,
    pub skip_health_checks: bool,
    /// Directory for the JSON-file audit backend.
    pub audit_dir: PathBuf,
    /// Source revision recorded in the audit trail.
    pub git_sha: Option<String>,
}

impl DeploymentConfig {
    pub fn new(resource_group: impl Into<String>, template_path: impl Into<PathBuf>) -> Self {
        Self {
            resource_group: resource_group.into(),
            location: None,
            template_path: template_path.into(),
            parameters_path: None,
            parameter_overrides: Vec::new(),
            allow_warnings: false,
            require_confirmation_for_deletes: true,
            skip_health_checks: false,
            audit_dir: PathBuf::from(".skopos/audit"),
            git_sha: None,
        }
    }
}
