//! Core data model.
//!
//! A workspace is a named arrangement of panels and components plus a camera,
//! owned by an entry. Its lifecycle state says whether that arrangement is
//! materialized in memory (hot) or only known by identity (cold).

pub mod entity;
pub mod geometry;
pub mod snapshot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub use entity::{Component, Entity, EntityKind, Panel, PanelKind};
pub use geometry::{Camera, Point, Size};
pub use snapshot::{SCHEMA_VERSION, StoredRecord, WorkspaceSnapshot};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Short display: first 8 chars of UUID
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identity of a workspace record.
    WorkspaceId
);
uuid_id!(
    /// Identity of the top-level entry that owns workspaces.
    EntryId
);
uuid_id!(
    /// Identity of a panel or component inside a workspace.
    EntityId
);

impl EntityId {
    /// Stable id for the synthesized main panel of a workspace.
    pub fn main_panel_for(workspace: WorkspaceId) -> Self {
        Self(Uuid::new_v5(&workspace.0, b"main-panel"))
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Per-record revision. Strictly increasing; every write names the version
/// it expects to replace.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Workspace identity and catalog metadata. Visual state lives in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub entry_id: EntryId,
    pub name: String,
    /// Created on first open of the entry. Cannot be deleted.
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(entry_id: EntryId, name: impl Into<String>, is_default: bool) -> Result<Self> {
        let name = validate_name(&name.into())?;
        let now = Utc::now();
        Ok(Self {
            id: WorkspaceId::new(),
            entry_id,
            name,
            is_default,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Trim and reject empty workspace names.
pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("workspace name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Residency state of a workspace inside the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Known by id only; never materialized in this session.
    Unloaded,
    /// Fetch from the store in flight.
    Hydrating,
    /// Ledger materialized; accepts mutations.
    Hot,
    /// Final flush in progress before dropping the ledger.
    Evicting,
    /// Ledger dropped after a successful flush.
    Cold,
    /// Removed locally or remotely. Terminal.
    Deleted,
}

impl Lifecycle {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Lifecycle) -> bool {
        use Lifecycle::*;
        if to == Deleted {
            return self != Deleted;
        }
        matches!(
            (self, to),
            (Unloaded, Hydrating)
                | (Cold, Hydrating)
                | (Hydrating, Hot)
                | (Hydrating, Unloaded) // fetch failed
                | (Hot, Evicting)
                | (Evicting, Cold)
                | (Evicting, Hot) // final flush failed
        )
    }

    pub fn is_hot(self) -> bool {
        matches!(self, Lifecycle::Hot)
    }

    pub fn needs_hydration(self) -> bool {
        matches!(self, Lifecycle::Unloaded | Lifecycle::Cold)
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Lifecycle::Unloaded => "unloaded",
            Lifecycle::Hydrating => "hydrating",
            Lifecycle::Hot => "hot",
            Lifecycle::Evicting => "evicting",
            Lifecycle::Cold => "cold",
            Lifecycle::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Save status
// ---------------------------------------------------------------------------

/// Persistence health of a workspace, as shown by a status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    Clean,
    Dirty,
    Saving,
    /// Transport retries exhausted. Local state is intact but not durable.
    Unsaved,
    /// Reconciliation against a newer version did not converge.
    Conflicted,
}

impl std::fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SaveStatus::Clean => "clean",
            SaveStatus::Dirty => "dirty",
            SaveStatus::Saving => "saving",
            SaveStatus::Unsaved => "unsaved",
            SaveStatus::Conflicted => "conflicted",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_follows_hot_cold_cycle() {
        use Lifecycle::*;
        let cycle = [Unloaded, Hydrating, Hot, Evicting, Cold, Hydrating, Hot];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Hot.can_transition_to(Cold));
        assert!(!Cold.can_transition_to(Hot));
        assert!(!Unloaded.can_transition_to(Hot));
    }

    #[test]
    fn deleted_reachable_from_everywhere_but_itself() {
        use Lifecycle::*;
        for from in [Unloaded, Hydrating, Hot, Evicting, Cold] {
            assert!(from.can_transition_to(Deleted));
        }
        assert!(!Deleted.can_transition_to(Deleted));
        assert!(!Deleted.can_transition_to(Hydrating));
    }

    #[test]
    fn main_panel_id_is_stable_per_workspace() {
        let ws = WorkspaceId::new();
        assert_eq!(EntityId::main_panel_for(ws), EntityId::main_panel_for(ws));
        assert_ne!(
            EntityId::main_panel_for(ws),
            EntityId::main_panel_for(WorkspaceId::new())
        );
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(Workspace::new(EntryId::new(), "   ", false).is_err());
        let ws = Workspace::new(EntryId::new(), "  Research ", false).unwrap();
        assert_eq!(ws.name, "Research");
    }
}
