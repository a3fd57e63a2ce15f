// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: One argument set, no subcommands: skopos runs exactly one deployment.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skopos")]
#[command(about = "Guarded Bicep deployment: lint, what-if gating, retry-aware apply, health verification")]
#[command(version)]
pub struct Cli {
    /// Target resource group
    #[arg(short = 'g', long)]
    pub resource_group: String,

    /// Deployment location (passed through to what-if)
    #[arg(short = 'l', long)]
    pub location: Option<String>,

    /// Bicep template file
    #[arg(short = 't', long)]
    pub template: PathBuf,

    /// Parameters file
    #[arg(short = 'p', long)]
    pub parameters: Option<PathBuf>,

    /// Parameter override as KEY=VALUE (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Do not fail the run on lint warnings
    #[arg(long)]
    pub allow_warnings: bool,

    /// Skip the interactive confirmation for destructive changes
    #[arg(long)]
    pub no_confirm_deletes: bool,

    /// Skip post-deploy health verification
    #[arg(long)]
    pub skip_health: bool,

    /// Directory for JSON audit records
    #[arg(long, default_value = ".skopos/audit")]
    pub audit_dir: PathBuf,

    /// Use a SQLite audit database at this path instead of JSON files
    #[arg(long)]
    pub audit_db: Option<PathBuf>,

    /// Source revision to record in the audit trail
    #[arg(long)]
    pub git_sha: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
