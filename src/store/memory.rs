//! Process-local store. Same versioning rules as the Postgres store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::Store;
use crate::error::{Error, Result};
use crate::model::{EntryId, StoredRecord, Version, Workspace, WorkspaceId, WorkspaceSnapshot};

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<WorkspaceId, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<WorkspaceId, StoredRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, id: WorkspaceId) -> Result<StoredRecord> {
        self.records()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn put(
        &self,
        id: WorkspaceId,
        snapshot: &WorkspaceSnapshot,
        expected: Version,
    ) -> Result<Version> {
        let mut records = self.records();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if record.version != expected {
            return Err(Error::VersionConflict {
                id,
                expected,
                actual: record.version,
            });
        }
        record.version = record.version.next();
        record.payload = Some(snapshot.clone());
        record.workspace.updated_at = Utc::now();
        Ok(record.version)
    }

    async fn delete(&self, id: WorkspaceId) -> Result<()> {
        self.records()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn create(&self, workspace: &Workspace) -> Result<StoredRecord> {
        let mut records = self.records();
        if records.contains_key(&workspace.id) {
            return Err(Error::Validation(format!(
                "workspace {} already exists",
                workspace.id
            )));
        }
        if workspace.is_default
            && records
                .values()
                .any(|r| r.workspace.entry_id == workspace.entry_id && r.workspace.is_default)
        {
            return Err(Error::Validation(format!(
                "entry {} already has a default workspace",
                workspace.entry_id
            )));
        }
        let record = StoredRecord {
            workspace: workspace.clone(),
            version: Version::default(),
            payload: None,
        };
        records.insert(workspace.id, record.clone());
        Ok(record)
    }

    async fn rename(&self, id: WorkspaceId, name: &str) -> Result<Workspace> {
        let mut records = self.records();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        record.workspace.name = name.to_string();
        record.workspace.updated_at = Utc::now();
        Ok(record.workspace.clone())
    }

    async fn list(&self, entry: EntryId) -> Result<Vec<Workspace>> {
        let mut workspaces: Vec<Workspace> = self
            .records()
            .values()
            .filter(|r| r.workspace.entry_id == entry)
            .map(|r| r.workspace.clone())
            .collect();
        workspaces.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(workspaces)
    }
}
