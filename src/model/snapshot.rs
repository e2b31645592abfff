//! Snapshot and persisted record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{Component, Panel};
use super::geometry::Camera;
use super::{Version, Workspace};

/// Payload schema written by this build. Readers accept this and older.
pub const SCHEMA_VERSION: u32 = 1;

/// Full visual state of a workspace at one instant. Never mutated after
/// capture; the next capture supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub schema_version: u32,
    #[serde(default)]
    pub panels: Vec<Panel>,
    #[serde(default)]
    pub components: Vec<Component>,
    /// Absent in payloads written before cameras were persisted.
    #[serde(default)]
    pub camera: Camera,
    pub captured_at: DateTime<Utc>,
}

impl WorkspaceSnapshot {
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            panels: Vec::new(),
            components: Vec::new(),
            camera: Camera::default(),
            captured_at: Utc::now(),
        }
    }

    /// Equality ignoring `captured_at`.
    pub fn same_content(&self, other: &Self) -> bool {
        self.schema_version == other.schema_version
            && self.panels == other.panels
            && self.components == other.components
            && self.camera == other.camera
    }

    pub fn entity_count(&self) -> usize {
        self.panels.len() + self.components.len()
    }
}

/// One persisted workspace record as the store hands it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub workspace: Workspace,
    pub version: Version,
    /// `None` until the first successful save.
    pub payload: Option<WorkspaceSnapshot>,
}
