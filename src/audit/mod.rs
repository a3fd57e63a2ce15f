// ABOUTME: Durable audit ledger for deployments: events, resources, result.
// ABOUTME: Backends (SQLite or JSON files) are interchangeable behind a trait.

mod file;
mod sqlite;

pub use file::FileStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One event in a deployment's ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub event_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Terminal result of a deployment, written once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub success: bool,
    pub message: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A resource discovered during the apply step, with its verified health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResource {
    pub resource_id: String,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The full ledger for one deployment run.
///
/// Events and resources are append-only; the result is written once at the
/// end of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub deployment_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub events: Vec<AuditEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AuditResult>,
    pub resources: Vec<AuditResource>,
}

impl AuditRecord {
    pub fn new(
        git_sha: Option<String>,
        template_path: Option<String>,
        parameters_path: Option<String>,
    ) -> Self {
        Self {
            deployment_id: Uuid::new_v4(),
            git_sha,
            template_path,
            parameters_path,
            created_at: Utc::now(),
            events: Vec::new(),
            result: None,
            resources: Vec::new(),
        }
    }

    pub fn add_event(
        &mut self,
        event_type: impl Into<String>,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        self.events.push(AuditEvent {
            at: Utc::now(),
            event_type: event_type.into(),
            message: message.into(),
            details,
        });
    }

    pub fn add_resource(
        &mut self,
        resource_id: impl Into<String>,
        resource_type: impl Into<String>,
        health_status: Option<String>,
        details: Option<serde_json::Value>,
    ) {
        self.resources.push(AuditResource {
            resource_id: resource_id.into(),
            resource_type: resource_type.into(),
            health_status,
            details,
        });
    }

    /// Update the recorded health of an already-discovered resource.
    pub fn set_resource_health(&mut self, resource_id: &str, health_status: impl Into<String>) {
        if let Some(resource) = self
            .resources
            .iter_mut()
            .find(|r| r.resource_id == resource_id)
        {
            resource.health_status = Some(health_status.into());
        }
    }

    pub fn set_result(
        &mut self,
        success: bool,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        self.result = Some(AuditResult {
            success,
            message: message.into(),
            at: Utc::now(),
            details,
        });
    }
}

/// Errors from audit persistence.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit record not found: {0}")]
    NotFound(Uuid),

    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("audit database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Persistence backend for audit records.
///
/// Synchronous: the pipeline persists once per run, at the very end.
pub trait AuditStore: Send + Sync {
    fn save_record(&self, record: &AuditRecord) -> Result<(), AuditError>;

    fn get_record(&self, id: Uuid) -> Result<AuditRecord, AuditError>;

    /// Most-recent-first listing, bounded by `limit`.
    fn list_records(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError>;
}

/// Allocates records and delegates persistence to the configured backend.
pub struct AuditLogger {
    store: Box<dyn AuditStore>,
}

impl AuditLogger {
    pub fn new(store: Box<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Logger backed by one JSON document per deployment under `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn with_file_backend(dir: &Path) -> Result<Self, AuditError> {
        Ok(Self::new(Box::new(FileStore::new(dir)?)))
    }

    /// Logger backed by a SQLite database at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or its schema created.
    pub fn with_sqlite_backend(path: &Path) -> Result<Self, AuditError> {
        Ok(Self::new(Box::new(SqliteStore::open(path)?)))
    }

    pub fn create_record(
        &self,
        git_sha: Option<String>,
        template_path: Option<PathBuf>,
        parameters_path: Option<PathBuf>,
    ) -> AuditRecord {
        AuditRecord::new(
            git_sha,
            template_path.map(|p| p.to_string_lossy().into_owned()),
            parameters_path.map(|p| p.to_string_lossy().into_owned()),
        )
    }

    pub fn save_record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.store.save_record(record)
    }

    pub fn get_record(&self, id: Uuid) -> Result<AuditRecord, AuditError> {
        self.store.get_record(id)
    }

    pub fn list_records(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        self.store.list_records(limit)
    }
}
