// ABOUTME: Dry-run change planning via the toolchain's what-if command.
// ABOUTME: Parses the symbol-prefixed change transcript and flags deletes.

use crate::process::{CommandRunner, ProcessError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const WHATIF_TIMEOUT: Duration = Duration::from_secs(300);

/// Kind of change the dry run predicts for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
    Deploy,
    NoChange,
    Ignore,
}

impl ChangeKind {
    /// Map a transcript prefix symbol to a change kind.
    fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '+' => Some(Self::Create),
            '~' => Some(Self::Modify),
            '-' => Some(Self::Delete),
            '!' => Some(Self::Deploy),
            '*' => Some(Self::Ignore),
            '=' => Some(Self::NoChange),
            _ => None,
        }
    }

    fn as_word(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Modify => "Modify",
            Self::Delete => "Delete",
            Self::Deploy => "Deploy",
            Self::NoChange => "NoChange",
            Self::Ignore => "Ignore",
        }
    }
}

/// One predicted change from the dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhatIfChange {
    /// Provider-qualified type, e.g. `Microsoft.Storage/storageAccounts`.
    /// Empty for bare-name lines the transcript gives no type for.
    pub resource_type: String,
    pub resource_name: String,
    pub kind: ChangeKind,
}

impl WhatIfChange {
    /// A change is destructive iff it deletes an existing resource.
    pub fn is_destructive(&self) -> bool {
        self.kind == ChangeKind::Delete
    }
}

/// Parsed result of one what-if invocation.
#[derive(Debug, Clone, Default)]
pub struct WhatIfResult {
    pub changes: Vec<WhatIfChange>,
    pub raw_output: String,
}

impl WhatIfResult {
    pub fn has_destructive_changes(&self) -> bool {
        self.changes.iter().any(WhatIfChange::is_destructive)
    }

    /// Count of changes per kind, for audit details and the prompt summary.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for change in &self.changes {
            *counts.entry(change.kind.as_word()).or_insert(0) += 1;
        }
        counts
    }
}

/// Errors that fail the whole planning call.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("template file not found: {0}")]
    TemplateNotFound(PathBuf),

    #[error("what-if timed out after {0} seconds")]
    TimedOut(u64),

    #[error("tool not found: {0}")]
    ToolMissing(String),

    #[error("what-if failed (exit {exit_code:?}): {stderr}")]
    CommandFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to run what-if: {0}")]
    Io(std::io::Error),
}

/// How the what-if transcript is interpreted.
///
/// Text is the only mode today; the variant is the seam for a structured
/// (JSON) what-if output mode.
#[derive(Debug, Clone, Copy, Default)]
pub enum ChangeParser {
    #[default]
    Text,
}

impl ChangeParser {
    fn parse(&self, transcript: &str) -> Vec<WhatIfChange> {
        match self {
            Self::Text => parse_text_changes(transcript),
        }
    }
}

/// Arguments for one dry-run analysis.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub resource_group: &'a str,
    pub template: &'a Path,
    pub parameters: Option<&'a Path>,
    pub location: Option<&'a str>,
    /// Ordered parameter overrides passed as `key=value`.
    pub overrides: &'a [(String, String)],
}

/// Runs `az deployment group what-if` and parses the change transcript.
pub struct WhatIfPlanner {
    runner: Arc<dyn CommandRunner>,
    tool: String,
    parser: ChangeParser,
}

impl WhatIfPlanner {
    pub fn new(runner: Arc<dyn CommandRunner>, tool: impl Into<String>) -> Self {
        Self {
            runner,
            tool: tool.into(),
            parser: ChangeParser::default(),
        }
    }

    /// Run the dry-run analysis for a template against a resource group.
    ///
    /// # Errors
    ///
    /// Fails the whole call on a missing template, a timeout, a missing
    /// tool, or a non-zero tool exit.
    pub async fn analyze(&self, request: &PlanRequest<'_>) -> Result<WhatIfResult, PlanError> {
        if !request.template.exists() {
            return Err(PlanError::TemplateNotFound(request.template.to_path_buf()));
        }

        let mut args: Vec<String> = [
            "deployment",
            "group",
            "what-if",
            "--resource-group",
            request.resource_group,
            "--template-file",
            &request.template.to_string_lossy(),
            "--no-prompt",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(parameters) = request.parameters {
            args.push("--parameters".to_string());
            args.push(parameters.to_string_lossy().into_owned());
        }
        for (key, value) in request.overrides {
            args.push("--parameters".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(location) = request.location {
            args.push("--location".to_string());
            args.push(location.to_string());
        }

        let output = self
            .runner
            .run(&self.tool, &args, WHATIF_TIMEOUT)
            .await
            .map_err(|e| match e {
                ProcessError::TimedOut(secs) => PlanError::TimedOut(secs),
                ProcessError::ToolMissing(tool) => PlanError::ToolMissing(tool),
                ProcessError::Io(io) => PlanError::Io(io),
            })?;

        if !output.success() {
            return Err(PlanError::CommandFailed {
                exit_code: output.exit_code,
                stderr: output.combined_output().trim().to_string(),
            });
        }

        let changes = self.parser.parse(&output.stdout);
        debug!(changes = changes.len(), "what-if parsed");

        Ok(WhatIfResult {
            changes,
            raw_output: output.stdout,
        })
    }
}

/// Parse the line-oriented what-if transcript.
///
/// A symbol prefix (`+ ~ - ! * =`) sets the active change kind for every
/// resource line until the next symbol. A resource token is `Type/Name`
/// (the name is the last path segment) or a bare name with no slash. An
/// optional literal kind word between symbol and resource is tolerated.
fn parse_text_changes(transcript: &str) -> Vec<WhatIfChange> {
    let mut changes = Vec::new();
    let mut active_kind: Option<ChangeKind> = None;

    for raw_line in transcript.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let symbol_kind = line
            .chars()
            .next()
            .and_then(ChangeKind::from_symbol);

        if let Some(kind) = symbol_kind {
            active_kind = Some(kind);

            // Drop a literal kind word if the transcript repeats it.
            let rest = line[1..].trim_start();
            let mut tokens = rest.split_whitespace().peekable();
            if let Some(&word) = tokens.peek() {
                if is_kind_word(word) {
                    tokens.next();
                }
            }

            if let Some(resource) = tokens.next() {
                changes.push(split_resource(resource, kind));
            }
            continue;
        }

        // A continuation line under the active symbol counts only when it
        // is a lone provider-qualified Type/Name token. Narrative lines
        // (legend, scope, summaries) never look like that.
        if let Some(kind) = active_kind {
            let mut tokens = line.split_whitespace();
            if let (Some(resource), None) = (tokens.next(), tokens.next()) {
                if let Some((type_part, _)) = resource.rsplit_once('/') {
                    if type_part.contains('.') {
                        changes.push(split_resource(resource, kind));
                    }
                }
            }
        }
    }

    changes
}

fn split_resource(resource: &str, kind: ChangeKind) -> WhatIfChange {
    let (resource_type, resource_name) = match resource.rsplit_once('/') {
        Some((type_part, name)) => (type_part.to_string(), name.to_string()),
        None => (String::new(), resource.to_string()),
    };
    WhatIfChange {
        resource_type,
        resource_name,
        kind,
    }
}

fn is_kind_word(word: &str) -> bool {
    matches!(
        word,
        "Create" | "Modify" | "Delete" | "Deploy" | "NoChange" | "Ignore"
    )
}
