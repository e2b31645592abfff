//! Snapshot engine: capture, apply, diff and reconcile workspace state.
//!
//! `apply` and `reconcile` are the second line of defense against
//! resurrecting deleted entities: snapshots can come from caches or server
//! copies that predate a deletion, so every entity they carry is checked
//! against the ledger's tombstones before it is admitted.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{
    Component, Entity, EntityId, Panel, SCHEMA_VERSION, WorkspaceId, WorkspaceSnapshot,
};
use crate::runtime::ledger::{Admission, DirtyKey, Ledger, Origin};

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Capture the ledger as a snapshot.
///
/// Coordinates are clamped into world bounds and non-finite values are
/// rejected. If the ledger has no main panel a default one is synthesized;
/// its id derives from the workspace id so repeated captures agree.
pub fn capture(ledger: &Ledger) -> Result<WorkspaceSnapshot> {
    let mut panels = Vec::with_capacity(ledger.panels().count() + 1);
    for panel in ledger.panels() {
        panels.push(normalize_panel(panel)?);
    }
    if !panels.iter().any(Panel::is_main) {
        let main = Panel::default_main(ledger.workspace_id());
        debug!(workspace = %ledger.workspace_id(), panel = %main.id, "synthesized main panel");
        let at = panels.partition_point(|p| p.id < main.id);
        panels.insert(at, main);
    }

    let mut components = Vec::new();
    for component in ledger.components() {
        components.push(normalize_component(component)?);
    }

    Ok(WorkspaceSnapshot {
        schema_version: SCHEMA_VERSION,
        panels,
        components,
        camera: ledger.camera().normalized()?,
        captured_at: Utc::now(),
    })
}

/// Admit the default main panel if the ledger has none, so the panel a
/// capture would synthesize is the one mutations address. Returns whether
/// it was added.
pub fn ensure_main_panel(ledger: &mut Ledger) -> Result<bool> {
    if ledger.main_panel().is_some() {
        return Ok(false);
    }
    let main = Panel::default_main(ledger.workspace_id());
    Ok(ledger.admit(main.into(), Origin::Persisted)? == Admission::Inserted)
}

fn normalize_panel(panel: &Panel) -> Result<Panel> {
    Ok(Panel {
        world_position: panel.world_position.normalized("panel")?,
        size: panel.size.normalized("panel")?,
        ..panel.clone()
    })
}

fn normalize_component(component: &Component) -> Result<Component> {
    Ok(Component {
        position: component.position.normalized("component")?,
        size: component.size.normalized("component")?,
        ..component.clone()
    })
}

// ---------------------------------------------------------------------------
// Validate / upgrade
// ---------------------------------------------------------------------------

/// Check a snapshot for `workspace` without touching any ledger.
pub fn validate(workspace: WorkspaceId, snapshot: &WorkspaceSnapshot) -> Result<()> {
    if snapshot.schema_version > SCHEMA_VERSION {
        return Err(Error::Validation(format!(
            "snapshot schema v{} is newer than supported v{SCHEMA_VERSION}",
            snapshot.schema_version
        )));
    }

    let mut seen = std::collections::HashSet::new();
    let mut mains = 0;
    for entity in entities(snapshot) {
        if !seen.insert(entity.id()) {
            return Err(Error::Validation(format!(
                "duplicate entity id {} in snapshot",
                entity.id()
            )));
        }
        if entity.workspace_id() != workspace {
            return Err(Error::Validation(format!(
                "entity {} belongs to workspace {}, not {workspace}",
                entity.id(),
                entity.workspace_id()
            )));
        }
        if matches!(&entity, Entity::Panel(p) if p.is_main()) {
            mains += 1;
        }
        entity.validate()?;
    }
    if mains > 1 {
        return Err(Error::Validation(format!("snapshot has {mains} main panels")));
    }
    snapshot.camera.validate()
}

/// Bring an older payload up to the current schema.
pub fn upgrade(mut snapshot: WorkspaceSnapshot) -> Result<WorkspaceSnapshot> {
    match snapshot.schema_version {
        v if v > SCHEMA_VERSION => Err(Error::Validation(format!(
            "snapshot schema v{v} is newer than supported v{SCHEMA_VERSION}"
        ))),
        // v0 payloads predate the camera field; serde already defaulted it.
        _ => {
            snapshot.schema_version = SCHEMA_VERSION;
            Ok(snapshot)
        }
    }
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    pub applied: usize,
    /// Entities the snapshot carried but the ledger has tombstoned.
    pub skipped_deleted: Vec<EntityId>,
}

/// Write a snapshot's panels, components and camera into the ledger.
///
/// The whole snapshot is validated first; on error the ledger is untouched.
/// Tombstoned ids are skipped.
pub fn apply(ledger: &mut Ledger, snapshot: &WorkspaceSnapshot) -> Result<ApplyReport> {
    validate(ledger.workspace_id(), snapshot)?;
    if let (Some(incoming), Some(existing)) = (
        snapshot.panels.iter().find(|p| p.is_main()),
        ledger.main_panel(),
    ) {
        if incoming.id != existing.id {
            return Err(Error::Validation(format!(
                "snapshot main panel {} conflicts with ledger main panel {}",
                incoming.id, existing.id
            )));
        }
    }

    let mut report = ApplyReport::default();
    for entity in entities(snapshot) {
        let id = entity.id();
        if ledger.deleted().contains(id) {
            report.skipped_deleted.push(id);
            continue;
        }
        ledger.admit(entity, Origin::Persisted)?;
        report.applied += 1;
    }
    ledger.set_camera(snapshot.camera, Origin::Persisted)?;

    if !report.skipped_deleted.is_empty() {
        debug!(
            workspace = %ledger.workspace_id(),
            skipped = report.skipped_deleted.len(),
            "apply skipped tombstoned entities"
        );
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    pub added: Vec<EntityId>,
    pub updated: Vec<EntityId>,
    pub removed: Vec<EntityId>,
    pub camera_changed: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && !self.camera_changed
    }
}

/// Entity-level difference from `old` to `new`, ids in ascending order.
pub fn diff(old: &WorkspaceSnapshot, new: &WorkspaceSnapshot) -> ChangeSet {
    let before = index(old);
    let after = index(new);
    let mut changes = ChangeSet {
        camera_changed: old.camera != new.camera,
        ..ChangeSet::default()
    };

    for (id, entity) in &after {
        match before.get(id) {
            None => changes.added.push(*id),
            Some(prev) if prev != entity => changes.updated.push(*id),
            Some(_) => {}
        }
    }
    changes.removed = before
        .keys()
        .filter(|id| !after.contains_key(id))
        .copied()
        .collect();
    changes
}

fn entities(snapshot: &WorkspaceSnapshot) -> impl Iterator<Item = Entity> + '_ {
    snapshot
        .panels
        .iter()
        .cloned()
        .map(Entity::Panel)
        .chain(snapshot.components.iter().cloned().map(Entity::Component))
}

fn index(snapshot: &WorkspaceSnapshot) -> BTreeMap<EntityId, Entity> {
    entities(snapshot).map(|e| (e.id(), e)).collect()
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Server changes adopted into the ledger.
    pub adopted: Vec<EntityId>,
    /// Server removals applied to the ledger.
    pub dropped: Vec<EntityId>,
    /// Fields changed on both sides; the local value wins.
    pub kept_local: Vec<EntityId>,
    pub skipped_deleted: Vec<EntityId>,
    pub camera_adopted: bool,
}

/// Merge a newer server snapshot into a hot ledger after a version conflict.
///
/// `base` is the snapshot this session last persisted or loaded; only what
/// the server changed relative to it is considered. Server wins on fields
/// the ledger has not touched; locally dirty fields keep the local value
/// (last writer wins per field). Tombstoned ids are never readmitted.
pub fn reconcile(
    ledger: &mut Ledger,
    base: Option<&WorkspaceSnapshot>,
    server: &WorkspaceSnapshot,
) -> Result<ReconcileReport> {
    validate(ledger.workspace_id(), server)?;
    let empty = WorkspaceSnapshot::empty();
    let base = base.unwrap_or(&empty);
    let changes = diff(base, server);
    let mut server_entities = index(server);
    let mut report = ReconcileReport::default();

    // Removals first so a replaced main panel frees its slot.
    for id in changes.removed {
        if ledger.is_field_dirty(DirtyKey::Entity(id)) {
            report.kept_local.push(id);
        } else if ledger.drop_remote(id).is_some() {
            report.dropped.push(id);
        }
    }

    for id in changes.added.into_iter().chain(changes.updated) {
        if ledger.is_field_dirty(DirtyKey::Entity(id)) {
            report.kept_local.push(id);
            continue;
        }
        if ledger.deleted().contains(id) {
            report.skipped_deleted.push(id);
            continue;
        }
        let Some(entity) = server_entities.remove(&id) else {
            continue;
        };
        match ledger.admit(entity, Origin::Persisted) {
            Ok(_) => report.adopted.push(id),
            Err(Error::Validation(reason)) => {
                warn!(workspace = %ledger.workspace_id(), entity = %id, %reason, "kept local copy");
                report.kept_local.push(id);
            }
            Err(e) => return Err(e),
        }
    }

    if changes.camera_changed {
        if ledger.is_field_dirty(DirtyKey::Camera) {
            debug!(workspace = %ledger.workspace_id(), "camera changed on both sides, keeping local");
        } else {
            ledger.set_camera(server.camera, Origin::Persisted)?;
            report.camera_adopted = true;
        }
    }
    Ok(report)
}
