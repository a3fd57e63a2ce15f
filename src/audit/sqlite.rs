// ABOUTME: SQLite audit backend: deployments plus event and resource child tables.
// ABOUTME: The deployment row is upserted; child rows are appended per save.

use super::{AuditError, AuditEvent, AuditRecord, AuditResource, AuditResult, AuditStore};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS deployments (
    deployment_id   TEXT PRIMARY KEY,
    git_sha         TEXT,
    template_path   TEXT,
    parameters_path TEXT,
    created_at      TEXT NOT NULL,
    success         INTEGER,
    result_message  TEXT,
    result_at       TEXT,
    result_details  TEXT
);
CREATE TABLE IF NOT EXISTS deployment_events (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    deployment_id TEXT NOT NULL REFERENCES deployments(deployment_id),
    at            TEXT NOT NULL,
    event_type    TEXT NOT NULL,
    message       TEXT NOT NULL,
    details       TEXT
);
CREATE TABLE IF NOT EXISTS deployment_resources (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    deployment_id TEXT NOT NULL REFERENCES deployments(deployment_id),
    resource_id   TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    health_status TEXT,
    details       TEXT
);
";

/// Relational audit backend.
///
/// `save_record` appends event and resource rows without deleting previous
/// ones, so saving the same record twice duplicates children. The pipeline
/// saves exactly once per deployment.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl AuditStore for SqliteStore {
    fn save_record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut conn = self.conn.lock().expect("audit connection lock poisoned");
        let tx = conn.transaction()?;

        let (success, result_message, result_at, result_details) = match &record.result {
            Some(result) => (
                Some(result.success),
                Some(result.message.clone()),
                Some(result.at.to_rfc3339()),
                result.details.as_ref().map(|d| d.to_string()),
            ),
            None => (None, None, None, None),
        };

        tx.execute(
            "INSERT INTO deployments (deployment_id, git_sha, template_path, parameters_path,
                                      created_at, success, result_message, result_at, result_details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(deployment_id) DO UPDATE SET
                 git_sha = excluded.git_sha,
                 template_path = excluded.template_path,
                 parameters_path = excluded.parameters_path,
                 success = excluded.success,
                 result_message = excluded.result_message,
                 result_at = excluded.result_at,
                 result_details = excluded.result_details",
            params![
                record.deployment_id.to_string(),
                record.git_sha,
                record.template_path,
                record.parameters_path,
                record.created_at.to_rfc3339(),
                success,
                result_message,
                result_at,
                result_details,
            ],
        )?;

        for event in &record.events {
            tx.execute(
                "INSERT INTO deployment_events (deployment_id, at, event_type, message, details)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.deployment_id.to_string(),
                    event.at.to_rfc3339(),
                    event.event_type,
                    event.message,
                    event.details.as_ref().map(|d| d.to_string()),
                ],
            )?;
        }

        for resource in &record.resources {
            tx.execute(
                "INSERT INTO deployment_resources
                     (deployment_id, resource_id, resource_type, health_status, details)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.deployment_id.to_string(),
                    resource.resource_id,
                    resource.resource_type,
                    resource.health_status,
                    resource.details.as_ref().map(|d| d.to_string()),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get_record(&self, id: Uuid) -> Result<AuditRecord, AuditError> {
        let conn = self.conn.lock().expect("audit connection lock poisoned");

        let row = conn
            .query_row(
                "SELECT git_sha, template_path, parameters_path, created_at,
                        success, result_message, result_at, result_details
                 FROM deployments WHERE deployment_id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<bool>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?
            .ok_or(AuditError::NotFound(id))?;

        let (git_sha, template_path, parameters_path, created_at, success, message, result_at, details) =
            row;

        let result = match (success, message, result_at) {
            (Some(success), Some(message), Some(at)) => Some(AuditResult {
                success,
                message,
                at: parse_timestamp(&at),
                details: details.and_then(|d| serde_json::from_str(&d).ok()),
            }),
            _ => None,
        };

        let mut record = AuditRecord {
            deployment_id: id,
            git_sha,
            template_path,
            parameters_path,
            created_at: parse_timestamp(&created_at),
            events: Vec::new(),
            result,
            resources: Vec::new(),
        };

        let mut stmt = conn.prepare(
            "SELECT at, event_type, message, details
             FROM deployment_events WHERE deployment_id = ?1 ORDER BY id",
        )?;
        let events = stmt.query_map(params![id.to_string()], |row| {
            Ok(AuditEvent {
                at: parse_timestamp(&row.get::<_, String>(0)?),
                event_type: row.get(1)?,
                message: row.get(2)?,
                details: row
                    .get::<_, Option<String>>(3)?
                    .and_then(|d| serde_json::from_str(&d).ok()),
            })
        })?;
        for event in events {
            record.events.push(event?);
        }

        let mut stmt = conn.prepare(
            "SELECT resource_id, resource_type, health_status, details
             FROM deployment_resources WHERE deployment_id = ?1 ORDER BY id",
        )?;
        let resources = stmt.query_map(params![id.to_string()], |row| {
            Ok(AuditResource {
                resource_id: row.get(0)?,
                resource_type: row.get(1)?,
                health_status: row.get(2)?,
                details: row
                    .get::<_, Option<String>>(3)?
                    .and_then(|d| serde_json::from_str(&d).ok()),
            })
        })?;
        for resource in resources {
            record.resources.push(resource?);
        }

        Ok(record)
    }

    fn list_records(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let ids: Vec<Uuid> = {
            let conn = self.conn.lock().expect("audit connection lock poisoned");
            let mut stmt = conn.prepare(
                "SELECT deployment_id FROM deployments ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                if let Ok(id) = Uuid::parse_str(&row?) {
                    ids.push(id);
                }
            }
            ids
        };

        ids.into_iter().map(|id| self.get_record(id)).collect()
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
