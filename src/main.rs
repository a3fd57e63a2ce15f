// ABOUTME: Entry point for the skopos CLI application.
// ABOUTME: Parses arguments, assembles the pipeline, and maps the outcome to an exit code.

mod cli;

use clap::Parser;
use cli::Cli;
use skopos::audit::AuditLogger;
use skopos::config::DeploymentConfig;
use skopos::error::{Error, Result};
use skopos::orchestrator::DeploymentOrchestrator;
use skopos::process::SystemRunner;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let overrides = parse_param_overrides(&cli.params)?;

    let mut config = DeploymentConfig::new(cli.resource_group, cli.template);
    config.location = cli.location;
    config.parameters_path = cli.parameters;
    config.parameter_overrides = overrides;
    config.allow_warnings = cli.allow_warnings;
    config.require_confirmation_for_deletes = !cli.no_confirm_deletes;
    config.skip_health_checks = cli.skip_health;
    config.audit_dir = cli.audit_dir;
    config.git_sha = cli.git_sha;

    let audit = match &cli.audit_db {
        Some(db_path) => AuditLogger::with_sqlite_backend(db_path)?,
        None => AuditLogger::with_file_backend(&config.audit_dir)?,
    };

    let runner = Arc::new(SystemRunner);
    let mut orchestrator = DeploymentOrchestrator::new(config, runner, audit);

    let outcome = orchestrator.deploy().await;

    if outcome.success {
        println!("{}", outcome.message);
    } else {
        eprintln!("Deployment failed: {}", outcome.message);
    }

    Ok(outcome.success)
}

fn parse_param_overrides(params: &[String]) -> Result<Vec<(String, String)>> {
    params
        .iter()
        .map(|raw| {
            raw.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| Error::InvalidParamOverride(raw.clone()))
        })
        .collect()
}
