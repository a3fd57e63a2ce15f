// ABOUTME: Bicep template linting via the toolchain's build-to-stdout mode.
// ABOUTME: Parses Error/Warning diagnostic lines from the compiler output.

use crate::process::{CommandRunner, ProcessError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const LINT_TIMEOUT: Duration = Duration::from_secs(60);

/// A single diagnostic emitted by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Compiler code, e.g. `BCP057`. Empty for synthesized entries.
    pub code: String,
    pub message: String,
}

/// Outcome of linting one template.
#[derive(Debug, Clone, Default)]
pub struct LintResult {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub raw_output: String,
}

impl LintResult {
    /// A lint passes when there are no errors and, unless warnings are
    /// allowed, no warnings either.
    pub fn success(&self, allow_warnings: bool) -> bool {
        self.errors.is_empty() && (allow_warnings || self.warnings.is_empty())
    }
}

/// Errors that prevent linting from producing a result at all.
#[derive(Debug, thiserror::Error)]
pub enum LintError {
    #[error("template file not found: {0}")]
    TemplateNotFound(PathBuf),

    #[error(transparent)]
    Process(ProcessError),
}

/// How diagnostic output is interpreted.
///
/// Only the line-oriented text format exists today; the variant leaves room
/// for a structured-output mode without touching callers.
#[derive(Debug, Clone, Copy, Default)]
pub enum DiagnosticParser {
    #[default]
    Text,
}

impl DiagnosticParser {
    fn parse(&self, output: &str) -> (Vec<Diagnostic>, Vec<Diagnostic>) {
        match self {
            Self::Text => parse_text_diagnostics(output),
        }
    }
}

/// Runs `az bicep build --file <path> --stdout` and collects diagnostics.
pub struct BicepLinter {
    runner: Arc<dyn CommandRunner>,
    tool: String,
    parser: DiagnosticParser,
}

impl BicepLinter {
    pub fn new(runner: Arc<dyn CommandRunner>, tool: impl Into<String>) -> Self {
        Self {
            runner,
            tool: tool.into(),
            parser: DiagnosticParser::default(),
        }
    }

    /// Lint a template file.
    ///
    /// A missing file fails immediately without invoking the tool. A tool
    /// timeout yields a result with one synthetic error rather than an
    /// `Err`, so the caller sees it like any other lint failure.
    ///
    /// # Errors
    ///
    /// Returns `LintError::TemplateNotFound` for a missing file, or a
    /// process error when the tool cannot be invoked at all.
    pub async fn lint_file(&self, path: &Path) -> Result<LintResult, LintError> {
        if !path.exists() {
            return Err(LintError::TemplateNotFound(path.to_path_buf()));
        }

        let args: Vec<String> = [
            "bicep",
            "build",
            "--file",
            &path.to_string_lossy(),
            "--stdout",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let output = match self.runner.run(&self.tool, &args, LINT_TIMEOUT).await {
            Ok(output) => output,
            Err(ProcessError::TimedOut(secs)) => {
                return Ok(LintResult {
                    errors: vec![Diagnostic {
                        code: String::new(),
                        message: format!("bicep build timed out after {secs} seconds"),
                    }],
                    warnings: Vec::new(),
                    raw_output: String::new(),
                });
            }
            Err(e) => return Err(LintError::Process(e)),
        };

        // Diagnostics go to stderr; stdout carries the compiled ARM JSON.
        let (mut errors, warnings) = self.parser.parse(&output.stderr);

        if !output.success() && errors.is_empty() && output.stderr.to_lowercase().contains("error")
        {
            errors.push(Diagnostic {
                code: String::new(),
                message: format!(
                    "bicep build failed (exit {:?}): {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }

        debug!(
            errors = errors.len(),
            warnings = warnings.len(),
            "lint finished"
        );

        Ok(LintResult {
            errors,
            warnings,
            raw_output: output.stderr,
        })
    }
}

fn parse_text_diagnostics(output: &str) -> (Vec<Diagnostic>, Vec<Diagnostic>) {
    // Known-valid patterns, compiled per call; linting happens once per run.
    let error_re =
        Regex::new(r"(?i)Error\s+([A-Z0-9-]+):\s*(.+)").expect("error pattern is valid");
    let warning_re =
        Regex::new(r"(?i)Warning\s+([A-Z0-9-]+):\s*(.+)").expect("warning pattern is valid");

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for line in output.lines() {
        if let Some(caps) = error_re.captures(line) {
            errors.push(Diagnostic {
                code: caps[1].to_string(),
                message: caps[2].trim().to_string(),
            });
        } else if let Some(caps) = warning_re.captures(line) {
            warnings.push(Diagnostic {
                code: caps[1].to_string(),
                message: caps[2].trim().to_string(),
            });
        }
    }

    (errors, warnings)
}
