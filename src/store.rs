//! Backing store client.
//!
//! The store is the only durable-write path. Every `put` names the version it
//! expects to replace; a store holding anything newer must refuse the write
//! with [`Error::VersionConflict`](crate::error::Error::VersionConflict)
//! rather than overwrite it. That check is what protects this session against
//! lost updates from another tab or process writing the same record.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{EntryId, StoredRecord, Version, Workspace, WorkspaceId, WorkspaceSnapshot};

pub use memory::MemoryStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Latest record for a workspace. `NotFound` if it does not exist.
    async fn get(&self, id: WorkspaceId) -> Result<StoredRecord>;

    /// Replace the payload if the record is still at `expected`. Returns the
    /// new version.
    async fn put(
        &self,
        id: WorkspaceId,
        snapshot: &WorkspaceSnapshot,
        expected: Version,
    ) -> Result<Version>;

    async fn delete(&self, id: WorkspaceId) -> Result<()>;

    /// Insert a new record at version 0 with no payload.
    async fn create(&self, workspace: &Workspace) -> Result<StoredRecord>;

    async fn rename(&self, id: WorkspaceId, name: &str) -> Result<Workspace>;

    /// Workspaces of an entry, default first, then by creation time.
    async fn list(&self, entry: EntryId) -> Result<Vec<Workspace>>;
}
