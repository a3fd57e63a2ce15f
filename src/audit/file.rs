// ABOUTME: JSON-file audit backend: one document per deployment ID.
// ABOUTME: Saves overwrite the whole document, so repeated saves are idempotent.

use super::{AuditError, AuditRecord, AuditStore};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Stores each audit record as `<dir>/<deployment_id>.json`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn new(dir: &Path) -> Result<Self, AuditError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl AuditStore for FileStore {
    fn save_record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let json = serde_json::to_string_pretty(record)?;
        fs::write(self.record_path(record.deployment_id), json)?;
        Ok(())
    }

    fn get_record(&self, id: Uuid) -> Result<AuditRecord, AuditError> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(AuditError::NotFound(id));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn list_records(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Skip unrelated files that happen to live in the audit dir.
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(record) = serde_json::from_str::<AuditRecord>(&content) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
