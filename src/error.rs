// ABOUTME: Application-wide error types for skopos.
// ABOUTME: Uses thiserror for ergonomic error handling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter override (expected KEY=VALUE): {0}")]
    InvalidParamOverride(String),

    #[error("audit setup failed: {0}")]
    Audit(#[from] crate::audit::AuditError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
