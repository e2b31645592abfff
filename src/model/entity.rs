//! Panels and components placed on a workspace canvas.

use serde::{Deserialize, Serialize};

use super::geometry::{Point, Size};
use super::{EntityId, WorkspaceId};
use crate::error::Result;

/// Default geometry of the main panel when a workspace has none.
pub const DEFAULT_MAIN_POSITION: Point = Point::new(2000.0, 1500.0);
pub const DEFAULT_MAIN_SIZE: Size = Size::new(520.0, 440.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelKind {
    /// The document the workspace is anchored on. Exactly one per workspace.
    Main,
    Note,
    Document,
    Media,
}

/// A document-like surface on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub id: EntityId,
    pub workspace_id: WorkspaceId,
    pub kind: PanelKind,
    pub world_position: Point,
    pub size: Size,
    /// Pointer to the content the panel renders (note id, URL, ...).
    pub content_ref: Option<String>,
    pub parent_panel_id: Option<EntityId>,
}

impl Panel {
    pub fn new(workspace_id: WorkspaceId, kind: PanelKind, world_position: Point, size: Size) -> Self {
        Self {
            id: EntityId::new(),
            workspace_id,
            kind,
            world_position,
            size,
            content_ref: None,
            parent_panel_id: None,
        }
    }

    /// The main panel a capture falls back to when the ledger has none.
    pub fn default_main(workspace_id: WorkspaceId) -> Self {
        Self {
            id: EntityId::main_panel_for(workspace_id),
            workspace_id,
            kind: PanelKind::Main,
            world_position: DEFAULT_MAIN_POSITION,
            size: DEFAULT_MAIN_SIZE,
            content_ref: None,
            parent_panel_id: None,
        }
    }

    pub fn with_content(mut self, content_ref: impl Into<String>) -> Self {
        self.content_ref = Some(content_ref.into());
        self
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent_panel_id = Some(parent);
        self
    }

    pub fn is_main(&self) -> bool {
        self.kind == PanelKind::Main
    }
}

/// An interactive widget (timer, calculator, media player, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: EntityId,
    pub workspace_id: WorkspaceId,
    /// Component type tag, e.g. "timer". Keys the background-operation registry.
    #[serde(rename = "type")]
    pub component_type: String,
    pub position: Point,
    pub size: Size,
    /// Opaque state owned by the component type.
    #[serde(default)]
    pub type_state: serde_json::Value,
}

impl Component {
    pub fn new(
        workspace_id: WorkspaceId,
        component_type: impl Into<String>,
        position: Point,
        size: Size,
    ) -> Self {
        Self {
            id: EntityId::new(),
            workspace_id,
            component_type: component_type.into(),
            position,
            size,
            type_state: serde_json::Value::Null,
        }
    }

    pub fn with_state(mut self, type_state: serde_json::Value) -> Self {
        self.type_state = type_state;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Panel,
    Component,
}

/// Anything that lives in a ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    Panel(Panel),
    Component(Component),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Panel(p) => p.id,
            Entity::Component(c) => c.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Panel(_) => EntityKind::Panel,
            Entity::Component(_) => EntityKind::Component,
        }
    }

    pub fn position(&self) -> Point {
        match self {
            Entity::Panel(p) => p.world_position,
            Entity::Component(c) => c.position,
        }
    }

    pub fn size(&self) -> Size {
        match self {
            Entity::Panel(p) => p.size,
            Entity::Component(c) => c.size,
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        match self {
            Entity::Panel(p) => p.workspace_id,
            Entity::Component(c) => c.workspace_id,
        }
    }

    /// Reject malformed geometry before the entity reaches a ledger.
    pub fn validate(&self) -> Result<()> {
        let what = match self.kind() {
            EntityKind::Panel => "panel",
            EntityKind::Component => "component",
        };
        self.position().validate(what)?;
        self.size().validate(what)
    }
}

impl From<Panel> for Entity {
    fn from(panel: Panel) -> Self {
        Entity::Panel(panel)
    }
}

impl From<Component> for Entity {
    fn from(component: Component) -> Self {
        Entity::Component(component)
    }
}
