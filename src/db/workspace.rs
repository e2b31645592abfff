//! Workspace records: versioned payload writes, catalog queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{EntryId, StoredRecord, Version, Workspace, WorkspaceId, WorkspaceSnapshot};
use crate::store::Store;
use crate::telemetry::metrics;

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: Uuid,
    entry_id: Uuid,
    name: String,
    is_default: bool,
    version: i64,
    payload: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkspaceRow {
    fn workspace(&self) -> Workspace {
        Workspace {
            id: WorkspaceId(self.id),
            entry_id: EntryId(self.entry_id),
            name: self.name.clone(),
            is_default: self.is_default,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn into_record(self) -> Result<StoredRecord> {
        let workspace = self.workspace();
        let payload = self.payload.map(serde_json::from_value).transpose()?;
        Ok(StoredRecord {
            workspace,
            version: Version(self.version as u64),
            payload,
        })
    }
}

const COLUMNS: &str =
    "id, entry_id, name, is_default, version, payload, created_at, updated_at";

fn count(operation: &'static str) {
    metrics::store_operations().add(1, &[KeyValue::new("operation", operation)]);
}

#[async_trait]
impl Store for Db {
    async fn get(&self, id: WorkspaceId) -> Result<StoredRecord> {
        count("get");
        let row: Option<WorkspaceRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM workspaces WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.ok_or_else(|| Error::NotFound(id.to_string()))?
            .into_record()
    }

    async fn put(
        &self,
        id: WorkspaceId,
        snapshot: &WorkspaceSnapshot,
        expected: Version,
    ) -> Result<Version> {
        count("put");
        let payload = serde_json::to_value(snapshot)?;

        // Compare-and-swap on version: the WHERE clause is the conflict check.
        let updated: Option<(i64,)> = sqlx::query_as(
            "UPDATE workspaces
             SET payload = $1, version = version + 1, updated_at = now()
             WHERE id = $2 AND version = $3
             RETURNING version",
        )
        .bind(&payload)
        .bind(id.0)
        .bind(expected.0 as i64)
        .fetch_optional(self.pool())
        .await?;

        if let Some((version,)) = updated {
            return Ok(Version(version as u64));
        }

        let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM workspaces WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;
        match current {
            None => Err(Error::NotFound(id.to_string())),
            Some((actual,)) => Err(Error::VersionConflict {
                id,
                expected,
                actual: Version(actual as u64),
            }),
        }
    }

    async fn delete(&self, id: WorkspaceId) -> Result<()> {
        count("delete");
        let result = sqlx::query("DELETE FROM workspaces WHERE id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn create(&self, workspace: &Workspace) -> Result<StoredRecord> {
        count("create");
        let row: WorkspaceRow = sqlx::query_as(&format!(
            "INSERT INTO workspaces (id, entry_id, name, is_default, version, payload, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 0, NULL, $5, $6)
             RETURNING {COLUMNS}"
        ))
        .bind(workspace.id.0)
        .bind(workspace.entry_id.0)
        .bind(&workspace.name)
        .bind(workspace.is_default)
        .bind(workspace.created_at)
        .bind(workspace.updated_at)
        .fetch_one(self.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => Error::Validation(format!(
                "workspace {} conflicts with an existing record (duplicate id or second default)",
                workspace.id
            )),
            other => Error::Database(other),
        })?;
        row.into_record()
    }

    async fn rename(&self, id: WorkspaceId, name: &str) -> Result<Workspace> {
        count("rename");
        let row: Option<WorkspaceRow> = sqlx::query_as(&format!(
            "UPDATE workspaces SET name = $1, updated_at = now() WHERE id = $2 RETURNING {COLUMNS}"
        ))
        .bind(name)
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| r.workspace())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn list(&self, entry: EntryId) -> Result<Vec<Workspace>> {
        count("list");
        let rows: Vec<WorkspaceRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM workspaces
             WHERE entry_id = $1
             ORDER BY is_default DESC, created_at ASC"
        ))
        .bind(entry.0)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(WorkspaceRow::workspace).collect())
    }
}
