//! In-memory registry of the entities materialized for one hot workspace.
//!
//! `admit` is the only way an entity enters a ledger, and it always consults
//! the deleted set first. Local mutations bump a generation counter and tag
//! the touched field with it, so a save that captured generation `g` can
//! clear exactly what it persisted and nothing that arrived afterwards.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::deleted::DeletedSet;
use crate::error::{Error, Result};
use crate::model::{Camera, Component, Entity, EntityId, Panel, Point, Size, WorkspaceId};

/// Where an entity or camera value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A user mutation. Marks the field dirty.
    Local,
    /// Loaded from the store, a preview, or a reconciled server copy.
    Persisted,
}

/// Granularity of dirty tracking and of conflict merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyKey {
    Entity(EntityId),
    Camera,
    /// Forces a write without pinning any field during a merge.
    Workspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Inserted,
    Replaced,
    /// The id is tombstoned; the ledger is unchanged.
    RefusedDeleted,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    workspace_id: WorkspaceId,
    panels: BTreeMap<EntityId, Panel>,
    components: BTreeMap<EntityId, Component>,
    camera: Camera,
    deleted: DeletedSet,
    dirty: HashMap<DirtyKey, u64>,
    generation: u64,
}

impl Ledger {
    pub fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            panels: BTreeMap::new(),
            components: BTreeMap::new(),
            camera: Camera::default(),
            deleted: DeletedSet::new(),
            dirty: HashMap::new(),
            generation: 0,
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    /// Counter of local mutations. Monotonic for the life of the ledger.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // -----------------------------------------------------------------------
    // Population
    // -----------------------------------------------------------------------

    /// Insert or replace an entity, unless its id is tombstoned.
    pub fn admit(&mut self, entity: Entity, origin: Origin) -> Result<Admission> {
        let id = entity.id();
        if self.deleted.contains(id) {
            debug!(workspace = %self.workspace_id, entity = %id, "refused tombstoned entity");
            return Ok(Admission::RefusedDeleted);
        }
        if entity.workspace_id() != self.workspace_id {
            return Err(Error::Validation(format!(
                "entity {id} belongs to workspace {}, not {}",
                entity.workspace_id(),
                self.workspace_id
            )));
        }
        entity.validate()?;

        let replaced = match entity {
            Entity::Panel(panel) => {
                if panel.is_main() {
                    if let Some(existing) = self.main_panel() {
                        if existing.id != panel.id {
                            return Err(Error::Validation(format!(
                                "workspace {} already has main panel {}",
                                self.workspace_id, existing.id
                            )));
                        }
                    }
                }
                self.components.remove(&id);
                self.panels.insert(id, panel).is_some()
            }
            Entity::Component(component) => {
                self.panels.remove(&id);
                self.components.insert(id, component).is_some()
            }
        };

        if origin == Origin::Local {
            self.touch(DirtyKey::Entity(id));
        }
        Ok(if replaced {
            Admission::Replaced
        } else {
            Admission::Inserted
        })
    }

    /// Explicit user removal: drop the entity and tombstone its id.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let removed = self.take(id)?;
        let generation = self.touch(DirtyKey::Entity(id));
        self.deleted.insert(id, generation);
        Some(removed)
    }

    /// Drop an entity the server no longer has. Not a user deletion, so no
    /// tombstone and no dirty mark.
    pub fn drop_remote(&mut self, id: EntityId) -> Option<Entity> {
        self.take(id)
    }

    fn take(&mut self, id: EntityId) -> Option<Entity> {
        if let Some(panel) = self.panels.remove(&id) {
            return Some(Entity::Panel(panel));
        }
        self.components.remove(&id).map(Entity::Component)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    pub fn move_entity(&mut self, id: EntityId, position: Point) -> Result<()> {
        position.validate("position")?;
        if let Some(panel) = self.panels.get_mut(&id) {
            panel.world_position = position;
        } else if let Some(component) = self.components.get_mut(&id) {
            component.position = position;
        } else {
            return Err(self.missing(id));
        }
        self.touch(DirtyKey::Entity(id));
        Ok(())
    }

    pub fn resize_entity(&mut self, id: EntityId, size: Size) -> Result<()> {
        size.validate("size")?;
        if let Some(panel) = self.panels.get_mut(&id) {
            panel.size = size;
        } else if let Some(component) = self.components.get_mut(&id) {
            component.size = size;
        } else {
            return Err(self.missing(id));
        }
        self.touch(DirtyKey::Entity(id));
        Ok(())
    }

    pub fn update_component_state(&mut self, id: EntityId, state: serde_json::Value) -> Result<()> {
        let Some(component) = self.components.get_mut(&id) else {
            return Err(self.missing(id));
        };
        component.type_state = state;
        self.touch(DirtyKey::Entity(id));
        Ok(())
    }

    pub fn set_camera(&mut self, camera: Camera, origin: Origin) -> Result<()> {
        camera.validate()?;
        self.camera = camera;
        if origin == Origin::Local {
            self.touch(DirtyKey::Camera);
        }
        Ok(())
    }

    /// Flag the workspace for persistence without changing any field.
    pub fn mark_dirty(&mut self) -> u64 {
        self.touch(DirtyKey::Workspace)
    }

    fn missing(&self, id: EntityId) -> Error {
        Error::NotFound(format!("entity {id} in workspace {}", self.workspace_id))
    }

    fn touch(&mut self, key: DirtyKey) -> u64 {
        self.generation += 1;
        self.dirty.insert(key, self.generation);
        self.generation
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, id: EntityId) -> Option<Entity> {
        self.panels
            .get(&id)
            .cloned()
            .map(Entity::Panel)
            .or_else(|| self.components.get(&id).cloned().map(Entity::Component))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.panels.contains_key(&id) || self.components.contains_key(&id)
    }

    /// Panels ordered by id.
    pub fn panels(&self) -> impl Iterator<Item = &Panel> {
        self.panels.values()
    }

    /// Components ordered by id.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn component(&self, id: EntityId) -> Option<&Component> {
        self.components.get(&id)
    }

    pub fn main_panel(&self) -> Option<&Panel> {
        self.panels.values().find(|p| p.is_main())
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.panels.keys().chain(self.components.keys()).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.panels.len() + self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deleted(&self) -> &DeletedSet {
        &self.deleted
    }

    // -----------------------------------------------------------------------
    // Dirty tracking
    // -----------------------------------------------------------------------

    /// Any local change not yet acknowledged by the store, deletions included.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn is_field_dirty(&self, key: DirtyKey) -> bool {
        self.dirty.contains_key(&key)
    }

    /// A save of `generation` was acknowledged: clear the fields and
    /// tombstones it covered. Later mutations stay dirty.
    pub fn commit(&mut self, generation: u64) -> Vec<EntityId> {
        self.dirty.retain(|_, g| *g > generation);
        self.deleted.confirm_through(generation)
    }

    // -----------------------------------------------------------------------
    // Residency
    // -----------------------------------------------------------------------

    /// Forget materialized content ahead of applying a fresher snapshot.
    /// Tombstones and dirty marks survive.
    pub fn reset_contents(&mut self) {
        self.panels.clear();
        self.components.clear();
        self.camera = Camera::default();
    }

    /// Drop everything but the tombstones. Used when going cold.
    pub fn unload(&mut self) {
        self.reset_contents();
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PanelKind, Point, Size};

    fn timer(ws: WorkspaceId) -> Component {
        Component::new(ws, "timer", Point::new(10.0, 10.0), Size::new(200.0, 120.0))
    }

    #[test]
    fn removed_entity_cannot_be_readmitted() {
        let ws = WorkspaceId::new();
        let mut ledger = Ledger::new(ws);
        let c = timer(ws);
        ledger.admit(c.clone().into(), Origin::Local).unwrap();

        assert!(ledger.remove(c.id).is_some());
        assert!(ledger.deleted().contains(c.id));

        let again = ledger.admit(c.clone().into(), Origin::Persisted).unwrap();
        assert_eq!(again, Admission::RefusedDeleted);
        assert!(!ledger.contains(c.id));
    }

    #[test]
    fn invalid_geometry_leaves_ledger_unchanged() {
        let ws = WorkspaceId::new();
        let mut ledger = Ledger::new(ws);
        let c = timer(ws);
        ledger.admit(c.clone().into(), Origin::Persisted).unwrap();
        let before = ledger.generation();

        let err = ledger
            .move_entity(c.id, Point::new(f64::NAN, 10.0))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(ledger.component(c.id).unwrap().position, Point::new(10.0, 10.0));
        assert_eq!(ledger.generation(), before);
        assert!(!ledger.is_dirty());
    }

    #[test]
    fn second_main_panel_is_rejected() {
        let ws = WorkspaceId::new();
        let mut ledger = Ledger::new(ws);
        ledger
            .admit(Panel::default_main(ws).into(), Origin::Persisted)
            .unwrap();
        let other = Panel::new(ws, PanelKind::Main, Point::new(0.0, 0.0), Size::new(10.0, 10.0));
        assert!(ledger.admit(other.into(), Origin::Local).is_err());
    }

    #[test]
    fn foreign_entities_are_rejected() {
        let mut ledger = Ledger::new(WorkspaceId::new());
        assert!(ledger.admit(timer(WorkspaceId::new()).into(), Origin::Local).is_err());
    }

    #[test]
    fn commit_keeps_mutations_made_after_capture() {
        let ws = WorkspaceId::new();
        let mut ledger = Ledger::new(ws);
        let a = timer(ws);
        let b = timer(ws);
        ledger.admit(a.clone().into(), Origin::Local).unwrap();
        let captured = ledger.generation();
        ledger.admit(b.clone().into(), Origin::Local).unwrap();

        ledger.commit(captured);
        assert!(!ledger.is_field_dirty(DirtyKey::Entity(a.id)));
        assert!(ledger.is_field_dirty(DirtyKey::Entity(b.id)));
        assert!(ledger.is_dirty());
    }

    #[test]
    fn commit_confirms_covered_deletions() {
        let ws = WorkspaceId::new();
        let mut ledger = Ledger::new(ws);
        let a = timer(ws);
        ledger.admit(a.clone().into(), Origin::Persisted).unwrap();
        ledger.remove(a.id);

        let confirmed = ledger.commit(ledger.generation());
        assert_eq!(confirmed, vec![a.id]);
        assert!(ledger.deleted().is_empty());
        assert!(!ledger.is_dirty());
    }

    #[test]
    fn mark_dirty_bumps_generation_only() {
        let ws = WorkspaceId::new();
        let mut ledger = Ledger::new(ws);
        let generation = ledger.mark_dirty();
        assert_eq!(generation, 1);
        assert!(ledger.is_field_dirty(DirtyKey::Workspace));
        assert!(ledger.is_empty());
        ledger.commit(generation);
        assert!(!ledger.is_dirty());
    }

    #[test]
    fn unload_keeps_tombstones() {
        let ws = WorkspaceId::new();
        let mut ledger = Ledger::new(ws);
        let a = timer(ws);
        ledger.admit(a.clone().into(), Origin::Persisted).unwrap();
        ledger.remove(a.id);
        ledger.unload();
        assert!(ledger.is_empty());
        assert!(ledger.deleted().contains(a.id));
    }
}
