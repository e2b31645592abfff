//! Runtime manager. The public API for hosting workspaces.
//!
//! The manager owns every workspace's lifecycle: which are hot, which are
//! cold, which is UI-active per entry, and when to hydrate or evict. All
//! lifecycle transitions go through here (or through the persistence queue
//! when the store reports a record gone). Mutations are accepted only for
//! hot workspaces and always end in a scheduled save.

pub mod background;
pub mod deleted;
pub mod ledger;
pub(crate) mod slot;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use opentelemetry::KeyValue;
use tokio::sync::broadcast;
use tokio::sync::futures::Notified;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventBus, EventKind};
use crate::hydration::{HydrationFuture, Hydrated, Hydrator, PreviewCache};
use crate::model::{
    Camera, Component, Entity, EntityId, EntryId, Lifecycle, Panel, Point, SaveStatus, Size,
    Version, Workspace, WorkspaceId, WorkspaceSnapshot, validate_name,
};
use crate::persistence::{PersistenceQueue, SaveHandle, SaveOutcome, SaveRequest};
use crate::snapshot;
use crate::store::{MemoryStore, Store};
use crate::telemetry::metrics;

use background::{BackgroundOperation, BackgroundRegistry};
use ledger::{Admission, Ledger, Origin};
use slot::{Slot, SlotState};

/// Name given to the workspace created for a fresh entry.
pub const DEFAULT_WORKSPACE_NAME: &str = "Default";

/// Handle to the runtime. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RuntimeManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    config: RuntimeConfig,
    events: Arc<EventBus>,
    previews: Arc<PreviewCache>,
    hydrator: Hydrator,
    queue: Arc<PersistenceQueue>,
    background: BackgroundRegistry,
    slots: Mutex<HashMap<WorkspaceId, Arc<Slot>>>,
    /// Ids of workspaces known to be deleted. Their slots are dropped.
    retired: Mutex<HashSet<WorkspaceId>>,
    /// UI-active workspace per entry. Never evicted for capacity.
    active: Mutex<HashMap<EntryId, WorkspaceId>>,
}

enum Step<'a> {
    Ready,
    Gone,
    Wait(Notified<'a>),
    Fetch(HydrationFuture, u64),
}

impl RuntimeManager {
    pub fn new(store: Arc<dyn Store>, config: RuntimeConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_journal_capacity));
        let previews = Arc::new(PreviewCache::new(config.preview_max_age()));
        let queue = Arc::new(PersistenceQueue::new(
            Arc::clone(&store),
            config.clone(),
            Arc::clone(&events),
            Arc::clone(&previews),
        ));
        Self {
            inner: Arc::new(Inner {
                hydrator: Hydrator::new(Arc::clone(&store)),
                store,
                config,
                events,
                previews,
                queue,
                background: BackgroundRegistry::new(),
                slots: Mutex::new(HashMap::new()),
                retired: Mutex::new(HashSet::new()),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Runtime over a process-local store (for testing).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), RuntimeConfig::default())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.inner.store)
    }

    // -----------------------------------------------------------------------
    // Slots
    // -----------------------------------------------------------------------

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<WorkspaceId, Arc<Slot>>> {
        self.inner.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<EntryId, WorkspaceId>> {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, id: WorkspaceId) -> Arc<Slot> {
        Arc::clone(
            self.slots()
                .entry(id)
                .or_insert_with(|| Arc::new(Slot::new(id))),
        )
    }

    fn retired(&self) -> std::sync::MutexGuard<'_, HashSet<WorkspaceId>> {
        self.inner.retired.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_retired(&self, id: WorkspaceId) -> bool {
        self.retired().contains(&id)
    }

    /// Forget a deleted workspace's slot and per-id bookkeeping, keeping
    /// only its id.
    fn retire(&self, id: WorkspaceId) {
        {
            let mut slots = self.slots();
            let deleted = slots
                .get(&id)
                .is_some_and(|slot| slot.lock().lifecycle == Lifecycle::Deleted);
            if !deleted {
                return;
            }
            slots.remove(&id);
        }
        self.retired().insert(id);
        self.inner.previews.remove(id);
        self.inner.queue.forget(id);
        self.clear_active(id);
        debug!(workspace = %id, "slot retired");
    }

    fn existing(&self, id: WorkspaceId) -> Result<Arc<Slot>> {
        self.slots()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn all_slots(&self) -> Vec<Arc<Slot>> {
        self.slots().values().cloned().collect()
    }

    /// Record catalog metadata for a workspace the store returned.
    fn register(&self, workspace: &Workspace) {
        if self.is_retired(workspace.id) {
            return;
        }
        let mut slots = self.slots();
        match slots.get(&workspace.id) {
            Some(slot) => {
                let mut state = slot.lock();
                if state.lifecycle != Lifecycle::Deleted {
                    state.meta = Some(workspace.clone());
                }
            }
            None => {
                slots.insert(workspace.id, Arc::new(Slot::with_meta(workspace.clone())));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Activation and hydration
    // -----------------------------------------------------------------------

    /// Make a workspace hot and UI-active for its entry.
    ///
    /// Cold and unloaded workspaces hydrate first. Concurrent activations of
    /// the same workspace share one fetch and all observe its outcome. A
    /// fresh preview, if cached, is rendered while the fetch is in flight.
    /// After activation the hot set is trimmed to capacity.
    pub async fn activate(&self, id: WorkspaceId) -> Result<()> {
        if self.is_retired(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        let slot = self.slot(id);
        loop {
            let step = {
                let mut state = slot.lock();
                match state.lifecycle {
                    Lifecycle::Hot => {
                        state.touch();
                        Step::Ready
                    }
                    Lifecycle::Deleted => Step::Gone,
                    Lifecycle::Evicting => Step::Wait(slot.settled()),
                    Lifecycle::Hydrating => Step::Fetch(self.inner.hydrator.fetch(id), state.epoch),
                    Lifecycle::Unloaded | Lifecycle::Cold => {
                        slot.transition(&mut state, Lifecycle::Hydrating, &self.inner.events)?;
                        state.epoch += 1;
                        let optimistic = self.render_preview(id, &mut state);
                        self.inner
                            .events
                            .emit(id, EventKind::HydrationStarted { optimistic });
                        Step::Fetch(self.inner.hydrator.fetch(id), state.epoch)
                    }
                }
            };
            match step {
                Step::Ready => break,
                Step::Gone => {
                    self.retire(id);
                    return Err(Error::NotFound(id.to_string()));
                }
                Step::Wait(settled) => settled.await,
                Step::Fetch(fetch, epoch) => {
                    let hydrated = fetch.wait().await;
                    if let Err(e) = self.install(&slot, epoch, hydrated) {
                        if e.is_not_found() {
                            self.retire(id);
                        }
                        return Err(e);
                    }
                    break;
                }
            }
        }

        self.mark_active(&slot);
        self.enforce_capacity().await;
        Ok(())
    }

    /// Apply a fresh cached preview while the authoritative fetch runs.
    fn render_preview(&self, id: WorkspaceId, state: &mut SlotState) -> bool {
        let Some(preview) = self.inner.previews.fresh(id) else {
            return false;
        };
        let applied = snapshot::apply(&mut state.ledger, &preview).and_then(|report| {
            snapshot::ensure_main_panel(&mut state.ledger)?;
            Ok(report)
        });
        match applied {
            Ok(report) => {
                debug!(workspace = %id, applied = report.applied, "rendered cached preview");
                true
            }
            Err(e) => {
                warn!(workspace = %id, error = %e, "discarding unusable preview");
                self.inner.previews.remove(id);
                false
            }
        }
    }

    /// Install a hydration outcome. The first caller to get here for an
    /// epoch does the work; later ones observe the result.
    fn install(
        &self,
        slot: &Slot,
        epoch: u64,
        hydrated: Result<Arc<Hydrated>>,
    ) -> Result<()> {
        let id = slot.id;
        let mut state = slot.lock();
        let current = state.lifecycle == Lifecycle::Hydrating && state.epoch == epoch;

        let hydrated = match hydrated {
            Ok(hydrated) => hydrated,
            Err(e) => {
                if current {
                    self.fail_hydration(slot, &mut state, &e);
                }
                return Err(e);
            }
        };
        if !current {
            return match state.lifecycle {
                Lifecycle::Hot => Ok(()),
                Lifecycle::Deleted => Err(Error::NotFound(id.to_string())),
                from => Err(Error::InvalidTransition {
                    from,
                    to: Lifecycle::Hot,
                }),
            };
        }

        // Preview content is replaced wholesale; tombstones still apply.
        state.ledger.reset_contents();
        let applied = snapshot::apply(&mut state.ledger, &hydrated.snapshot).and_then(|report| {
            snapshot::ensure_main_panel(&mut state.ledger)?;
            Ok(report)
        });
        let report = match applied {
            Ok(report) => report,
            Err(e) => {
                self.fail_hydration(slot, &mut state, &e);
                return Err(e);
            }
        };
        self.inner.hydrator.finish(id);

        state.version = hydrated.record.version;
        state.base = Some(hydrated.snapshot.clone());
        state.meta = Some(hydrated.record.workspace.clone());
        if state.ledger.is_dirty() {
            state.save_status = SaveStatus::Dirty;
        } else {
            state.persisted_generation = state.ledger.generation();
            state.save_status = SaveStatus::Clean;
        }
        state.touch();
        slot.transition(&mut state, Lifecycle::Hot, &self.inner.events)?;

        self.inner.events.emit(
            id,
            EventKind::Hydrated {
                version: hydrated.record.version,
                skipped_deleted: report.skipped_deleted.len(),
            },
        );
        info!(
            workspace = %id,
            version = %hydrated.record.version,
            entities = state.ledger.len(),
            skipped_deleted = report.skipped_deleted.len(),
            "workspace hydrated"
        );
        Ok(())
    }

    fn fail_hydration(&self, slot: &Slot, state: &mut SlotState, error: &Error) {
        self.inner.hydrator.finish(slot.id);
        state.ledger.reset_contents();
        let to = if error.is_not_found() {
            Lifecycle::Deleted
        } else {
            Lifecycle::Unloaded
        };
        if let Err(e) = slot.transition(state, to, &self.inner.events) {
            warn!(workspace = %slot.id, error = %e, "cannot leave hydrating state");
        }
        self.inner.events.emit(
            slot.id,
            EventKind::HydrationFailed {
                error: error.to_string(),
                retryable: error.is_retryable(),
            },
        );
        warn!(workspace = %slot.id, error = %error, lifecycle = %to, "hydration failed");
    }

    fn mark_active(&self, slot: &Slot) {
        let Some(entry_id) = slot.lock().meta.as_ref().map(|m| m.entry_id) else {
            return;
        };
        let previous = self.active().insert(entry_id, slot.id);
        if previous != Some(slot.id) {
            self.inner
                .events
                .emit(slot.id, EventKind::ActiveChanged { entry_id, previous });
        }
    }

    fn clear_active(&self, id: WorkspaceId) {
        self.active().retain(|_, active| *active != id);
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    /// Trim the hot set to `max_hot`, least recently touched first. Active
    /// and protected workspaces are never chosen.
    async fn enforce_capacity(&self) {
        let active: HashSet<WorkspaceId> = self.active().values().copied().collect();
        let mut hot = 0usize;
        let mut candidates = Vec::new();
        for slot in self.all_slots() {
            let state = slot.lock();
            if state.lifecycle != Lifecycle::Hot {
                continue;
            }
            hot += 1;
            if active.contains(&slot.id) || self.is_protected_state(&state) {
                continue;
            }
            candidates.push((state.last_touched, slot.id));
        }

        let max_hot = self.inner.config.max_hot;
        if hot <= max_hot {
            return;
        }
        candidates.sort();
        let excess = hot - max_hot;
        if candidates.len() < excess {
            warn!(hot, max_hot, evictable = candidates.len(), "hot set over capacity");
        }
        for (_, id) in candidates.into_iter().take(excess) {
            if let Err(e) = self.evict_with(id, false, "capacity").await {
                warn!(workspace = %id, error = %e, "capacity eviction failed");
            }
        }
    }

    /// Flush a hot workspace and take it cold.
    ///
    /// Protected workspaces are refused unless `override_protected` is set,
    /// in which case their background operations are stopped first. If the
    /// flush fails the workspace stays hot and the error is returned.
    pub async fn evict(&self, id: WorkspaceId, override_protected: bool) -> Result<()> {
        self.evict_with(id, override_protected, "explicit").await
    }

    async fn evict_with(
        &self,
        id: WorkspaceId,
        override_protected: bool,
        trigger: &'static str,
    ) -> Result<()> {
        let slot = self.existing(id)?;
        let refused = {
            let mut state = slot.lock();
            match state.lifecycle {
                Lifecycle::Cold | Lifecycle::Unloaded => return Ok(()),
                Lifecycle::Deleted => return Err(Error::NotFound(id.to_string())),
                Lifecycle::Hydrating | Lifecycle::Evicting => {
                    return Err(Error::InvalidTransition {
                        from: state.lifecycle,
                        to: Lifecycle::Evicting,
                    });
                }
                Lifecycle::Hot => {}
            }
            let running = self.inner.background.running(&state.ledger);
            if !override_protected && (state.protected || !running.is_empty()) {
                Some(if state.protected {
                    "workspace is protected".to_string()
                } else {
                    format!("{} background operation(s) running", running.len())
                })
            } else {
                for (op, component) in &running {
                    info!(workspace = %id, component = %component.id, "stopping background operation");
                    op.stop(id, component);
                }
                slot.transition(&mut state, Lifecycle::Evicting, &self.inner.events)?;
                None
            }
        };
        if let Some(reason) = refused {
            info!(workspace = %id, %reason, trigger, "eviction refused");
            metrics::evictions().add(
                1,
                &[KeyValue::new("result", "refused"), KeyValue::new("trigger", trigger)],
            );
            self.inner
                .events
                .emit(id, EventKind::EvictionRefused { reason });
            return Err(Error::Protected(id));
        }

        if let Err(e) = self.inner.queue.save_now(&slot, "eviction").await {
            {
                let mut state = slot.lock();
                if state.lifecycle == Lifecycle::Evicting {
                    if let Err(t) = slot.transition(&mut state, Lifecycle::Hot, &self.inner.events) {
                        warn!(workspace = %id, error = %t, "cannot return to hot");
                    }
                }
            }
            metrics::evictions().add(
                1,
                &[KeyValue::new("result", "failed"), KeyValue::new("trigger", trigger)],
            );
            warn!(workspace = %id, error = %e, trigger, "eviction flush failed; staying hot, retry later");
            return Err(e);
        }

        let preview = {
            let mut state = slot.lock();
            if state.lifecycle != Lifecycle::Evicting {
                return Ok(());
            }
            let preview = snapshot::capture(&state.ledger).ok();
            state.ledger.unload();
            state.base = None;
            state.save_status = SaveStatus::Clean;
            slot.transition(&mut state, Lifecycle::Cold, &self.inner.events)?;
            preview
        };
        if let Some(preview) = preview {
            self.inner.previews.store(id, preview);
        }
        self.clear_active(id);
        metrics::evictions().add(
            1,
            &[KeyValue::new("result", "evicted"), KeyValue::new("trigger", trigger)],
        );
        info!(workspace = %id, trigger, "workspace evicted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Protection and background operations
    // -----------------------------------------------------------------------

    fn is_protected_state(&self, state: &SlotState) -> bool {
        state.protected || !self.inner.background.running(&state.ledger).is_empty()
    }

    /// Whether eviction of `id` would currently be refused.
    pub fn is_protected(&self, id: WorkspaceId) -> bool {
        match self.existing(id) {
            Ok(slot) => self.is_protected_state(&slot.lock()),
            Err(_) => false,
        }
    }

    pub fn set_protected(&self, id: WorkspaceId, protected: bool) -> Result<()> {
        let slot = self.existing(id)?;
        slot.lock().protected = protected;
        Ok(())
    }

    /// Register the background-operation contract for a component type.
    pub fn register_background(
        &self,
        component_type: impl Into<String>,
        op: Arc<dyn BackgroundOperation>,
    ) {
        self.inner.background.register(component_type, op);
    }

    pub fn start_background(&self, id: WorkspaceId, entity: EntityId) -> Result<()> {
        let (op, component) = self.background_target(id, entity)?;
        op.start(id, &component)
    }

    pub fn stop_background(&self, id: WorkspaceId, entity: EntityId) -> Result<()> {
        let (op, component) = self.background_target(id, entity)?;
        op.stop(id, &component);
        Ok(())
    }

    fn background_target(
        &self,
        id: WorkspaceId,
        entity: EntityId,
    ) -> Result<(Arc<dyn BackgroundOperation>, Component)> {
        let slot = self.existing(id)?;
        let component = {
            let state = slot.lock();
            if !state.lifecycle.is_hot() {
                return Err(Error::NotHot(id));
            }
            state
                .ledger
                .component(entity)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("component {entity} in workspace {id}")))?
        };
        let op = self
            .inner
            .background
            .contract(&component.component_type)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "component type {:?} has no background operation",
                    component.component_type
                ))
            })?;
        Ok((op, component))
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Run `f` against a hot workspace's ledger and mark it dirty. The
    /// caller schedules the save.
    fn mutate<T>(
        &self,
        id: WorkspaceId,
        f: impl FnOnce(&mut Ledger) -> Result<T>,
    ) -> Result<(Arc<Slot>, T)> {
        let slot = self.existing(id)?;
        let value = {
            let mut state = slot.lock();
            if !state.lifecycle.is_hot() {
                return Err(Error::NotHot(id));
            }
            let value = f(&mut state.ledger)?;
            state.save_status = SaveStatus::Dirty;
            state.touch();
            value
        };
        Ok((slot, value))
    }

    fn mutate_debounced<T>(
        &self,
        id: WorkspaceId,
        reason: &str,
        f: impl FnOnce(&mut Ledger) -> Result<T>,
    ) -> Result<T> {
        let (slot, value) = self.mutate(id, f)?;
        self.inner.queue.schedule_debounced(&slot, reason.to_string());
        Ok(value)
    }

    fn admit_local(ledger: &mut Ledger, entity: Entity) -> Result<EntityId> {
        let id = entity.id();
        match ledger.admit(entity, Origin::Local)? {
            Admission::RefusedDeleted => Err(Error::Validation(format!(
                "entity {id} was deleted and cannot be re-added"
            ))),
            Admission::Inserted | Admission::Replaced => Ok(id),
        }
    }

    pub fn add_panel(&self, id: WorkspaceId, panel: Panel) -> Result<EntityId> {
        self.mutate_debounced(id, "panel added", |ledger| {
            Self::admit_local(ledger, panel.into())
        })
    }

    pub fn add_component(&self, id: WorkspaceId, component: Component) -> Result<EntityId> {
        self.mutate_debounced(id, "component added", |ledger| {
            Self::admit_local(ledger, component.into())
        })
    }

    pub fn move_entity(&self, id: WorkspaceId, entity: EntityId, position: Point) -> Result<()> {
        self.mutate_debounced(id, "entity moved", |ledger| {
            ledger.move_entity(entity, position)
        })
    }

    pub fn resize_entity(&self, id: WorkspaceId, entity: EntityId, size: Size) -> Result<()> {
        self.mutate_debounced(id, "entity resized", |ledger| {
            ledger.resize_entity(entity, size)
        })
    }

    pub fn update_component_state(
        &self,
        id: WorkspaceId,
        entity: EntityId,
        state: serde_json::Value,
    ) -> Result<()> {
        self.mutate_debounced(id, "component state", |ledger| {
            ledger.update_component_state(entity, state)
        })
    }

    pub fn update_camera(&self, id: WorkspaceId, camera: Camera) -> Result<()> {
        self.mutate_debounced(id, "camera", |ledger| {
            ledger.set_camera(camera, Origin::Local)
        })
    }

    /// Flag a hot workspace for persistence without a ledger change.
    pub fn mark_dirty(&self, id: WorkspaceId, reason: &str) -> Result<()> {
        self.mutate_debounced(id, reason, |ledger| {
            ledger.mark_dirty();
            Ok(())
        })
    }

    /// Remove an entity. The removal is tombstoned at once, so no snapshot
    /// can bring it back, and persisted immediately.
    pub fn remove_entity(&self, id: WorkspaceId, entity: EntityId) -> Result<SaveHandle> {
        let (slot, _) = self.mutate(id, |ledger| {
            ledger.remove(entity).ok_or_else(|| {
                Error::NotFound(format!("entity {entity} in workspace {id}"))
            })
        })?;
        self.inner
            .events
            .emit(id, EventKind::EntityRemoved { entity_id: entity });
        Ok(self
            .inner
            .queue
            .schedule_immediate(&slot, "entity removed".to_string()))
    }

    // -----------------------------------------------------------------------
    // Saves
    // -----------------------------------------------------------------------

    /// Enqueue a save for a workspace.
    pub fn schedule_save(&self, id: WorkspaceId, request: SaveRequest) -> Result<Option<SaveHandle>> {
        let slot = self.existing(id)?;
        Ok(self.inner.queue.schedule(&slot, request))
    }

    /// Write pending changes now and wait for the outcome.
    pub async fn flush(&self, id: WorkspaceId) -> Result<SaveOutcome> {
        let slot = self.existing(id)?;
        self.inner.queue.save_now(&slot, "flush").await
    }

    /// Flush every hot workspace concurrently.
    pub async fn flush_all(&self) -> Vec<(WorkspaceId, Result<SaveOutcome>)> {
        let hot = self.hot_workspaces();
        let flushes = hot.iter().map(|id| self.flush(*id));
        let results = futures::future::join_all(flushes).await;
        hot.into_iter().zip(results).collect()
    }

    pub fn has_pending_save(&self, id: WorkspaceId) -> bool {
        self.inner.queue.has_pending(id)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The workspace's current contents, as a save would capture them.
    /// Available while hot, and during hydration when a preview rendered.
    pub fn view(&self, id: WorkspaceId) -> Result<WorkspaceSnapshot> {
        let slot = self.existing(id)?;
        let state = slot.lock();
        match state.lifecycle {
            Lifecycle::Hot | Lifecycle::Evicting | Lifecycle::Hydrating => {
                snapshot::capture(&state.ledger)
            }
            _ => Err(Error::NotHot(id)),
        }
    }

    pub fn entity(&self, id: WorkspaceId, entity: EntityId) -> Option<Entity> {
        let slot = self.existing(id).ok()?;
        let state = slot.lock();
        state.ledger.get(entity)
    }

    /// Whether `entity` is tombstoned in `id` pending confirmation.
    pub fn is_deleted(&self, id: WorkspaceId, entity: EntityId) -> bool {
        self.existing(id)
            .map(|slot| slot.lock().ledger.deleted().contains(entity))
            .unwrap_or(false)
    }

    pub fn lifecycle(&self, id: WorkspaceId) -> Lifecycle {
        match self.existing(id) {
            Ok(slot) => slot.lock().lifecycle,
            Err(_) if self.is_retired(id) => Lifecycle::Deleted,
            Err(_) => Lifecycle::Unloaded,
        }
    }

    pub fn save_status(&self, id: WorkspaceId) -> Option<SaveStatus> {
        self.existing(id).ok().map(|slot| slot.lock().save_status)
    }

    pub fn version(&self, id: WorkspaceId) -> Option<Version> {
        self.existing(id).ok().map(|slot| slot.lock().version)
    }

    pub fn workspace(&self, id: WorkspaceId) -> Option<Workspace> {
        self.existing(id).ok().and_then(|slot| slot.lock().meta.clone())
    }

    pub fn active_workspace(&self, entry: EntryId) -> Option<WorkspaceId> {
        self.active().get(&entry).copied()
    }

    /// Hot workspace ids in ascending order.
    pub fn hot_workspaces(&self) -> Vec<WorkspaceId> {
        let mut hot: Vec<WorkspaceId> = self
            .all_slots()
            .into_iter()
            .filter(|slot| slot.lock().lifecycle == Lifecycle::Hot)
            .map(|slot| slot.id)
            .collect();
        hot.sort();
        hot
    }

    /// Fetches issued to the store for hydration, shared joins excluded.
    pub fn hydration_fetches(&self) -> u64 {
        self.inner.hydrator.fetch_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn events_since(&self, seq: u64) -> Vec<Event> {
        self.inner.events.since(seq)
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    /// The entry's default workspace, created on first open.
    pub async fn open_entry(&self, entry: EntryId) -> Result<Workspace> {
        if let Some(default) = self.find_default(entry).await? {
            return Ok(default);
        }
        let workspace = Workspace::new(entry, DEFAULT_WORKSPACE_NAME, true)?;
        match self.inner.store.create(&workspace).await {
            Ok(record) => {
                info!(entry = %entry, workspace = %record.workspace.id, "created default workspace");
                self.register(&record.workspace);
                Ok(record.workspace)
            }
            // Lost a race with another opener; theirs is the default.
            Err(Error::Validation(reason)) => self
                .find_default(entry)
                .await?
                .ok_or(Error::Validation(reason)),
            Err(e) => Err(e),
        }
    }

    async fn find_default(&self, entry: EntryId) -> Result<Option<Workspace>> {
        let workspaces = self.list_workspaces(entry).await?;
        Ok(workspaces.into_iter().find(|w| w.is_default))
    }

    pub async fn create_workspace(&self, entry: EntryId, name: &str) -> Result<Workspace> {
        let workspace = Workspace::new(entry, name, false)?;
        let record = self.inner.store.create(&workspace).await?;
        self.register(&record.workspace);
        info!(entry = %entry, workspace = %record.workspace.id, name = %record.workspace.name, "workspace created");
        Ok(record.workspace)
    }

    pub async fn rename_workspace(&self, id: WorkspaceId, name: &str) -> Result<Workspace> {
        let name = validate_name(name)?;
        let workspace = self.inner.store.rename(id, &name).await?;
        self.register(&workspace);
        Ok(workspace)
    }

    pub async fn list_workspaces(&self, entry: EntryId) -> Result<Vec<Workspace>> {
        let workspaces = self.inner.store.list(entry).await?;
        for workspace in &workspaces {
            self.register(workspace);
        }
        Ok(workspaces)
    }

    /// Delete a workspace and its persisted record. The default workspace
    /// of an entry cannot be deleted. A pending debounced save is dropped;
    /// a write already in flight is awaited first.
    pub async fn delete_workspace(&self, id: WorkspaceId) -> Result<()> {
        if self.is_retired(id) {
            return Ok(());
        }
        let slot = self.slot(id);
        let known = slot.lock().meta.clone();
        let workspace = match known {
            Some(workspace) => workspace,
            None => self.inner.store.get(id).await?.workspace,
        };
        if workspace.is_default {
            return Err(Error::DefaultWorkspace(id));
        }

        {
            let mut state = slot.lock();
            if state.lifecycle != Lifecycle::Deleted {
                slot.transition(&mut state, Lifecycle::Deleted, &self.inner.events)?;
            }
            state.ledger.unload();
            state.save_status = SaveStatus::Clean;
        }
        self.inner.hydrator.finish(id);
        self.inner.queue.cancel_pending(id);
        self.inner.queue.drain(id).await;

        match self.inner.store.delete(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(workspace = %id, "record already gone"),
            Err(e) => return Err(e),
        }
        self.retire(id);
        info!(workspace = %id, "workspace deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PanelKind;

    async fn hot_workspace(runtime: &RuntimeManager) -> Workspace {
        let entry = EntryId::new();
        let workspace = runtime.open_entry(entry).await.unwrap();
        runtime.activate(workspace.id).await.unwrap();
        workspace
    }

    #[tokio::test]
    async fn open_entry_creates_one_default() {
        let runtime = RuntimeManager::in_memory();
        let entry = EntryId::new();
        let first = runtime.open_entry(entry).await.unwrap();
        let second = runtime.open_entry(entry).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.is_default);
        assert_eq!(first.name, DEFAULT_WORKSPACE_NAME);
        assert_eq!(runtime.list_workspaces(entry).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn activation_makes_workspace_hot_and_active() {
        let runtime = RuntimeManager::in_memory();
        let workspace = hot_workspace(&runtime).await;
        assert_eq!(runtime.lifecycle(workspace.id), Lifecycle::Hot);
        assert_eq!(
            runtime.active_workspace(workspace.entry_id),
            Some(workspace.id)
        );
        // A never-saved workspace still shows its main panel.
        let view = runtime.view(workspace.id).unwrap();
        assert_eq!(view.panels.len(), 1);
        assert_eq!(view.panels[0].kind, PanelKind::Main);
    }

    #[tokio::test]
    async fn mutations_require_hot_workspace() {
        let runtime = RuntimeManager::in_memory();
        let entry = EntryId::new();
        let workspace = runtime.create_workspace(entry, "Side").await.unwrap();
        let err = runtime
            .update_camera(workspace.id, Camera::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotHot(_)));
    }

    #[tokio::test]
    async fn default_workspace_cannot_be_deleted() {
        let runtime = RuntimeManager::in_memory();
        let workspace = hot_workspace(&runtime).await;
        let err = runtime.delete_workspace(workspace.id).await.unwrap_err();
        assert!(matches!(err, Error::DefaultWorkspace(_)));
        assert_eq!(runtime.lifecycle(workspace.id), Lifecycle::Hot);
    }

    #[tokio::test]
    async fn deleted_workspace_cannot_be_activated() {
        let runtime = RuntimeManager::in_memory();
        let entry = EntryId::new();
        runtime.open_entry(entry).await.unwrap();
        let extra = runtime.create_workspace(entry, "Scratch").await.unwrap();
        runtime.activate(extra.id).await.unwrap();

        runtime.delete_workspace(extra.id).await.unwrap();
        assert_eq!(runtime.lifecycle(extra.id), Lifecycle::Deleted);
        assert!(runtime.activate(extra.id).await.unwrap_err().is_not_found());
        assert_eq!(runtime.list_workspaces(entry).await.unwrap().len(), 1);
        assert!(!runtime.slots().contains_key(&extra.id));
    }

    #[tokio::test]
    async fn missing_workspace_is_retired_after_failed_hydration() {
        let runtime = RuntimeManager::in_memory();
        let missing = WorkspaceId::new();

        assert!(runtime.activate(missing).await.unwrap_err().is_not_found());
        assert_eq!(runtime.lifecycle(missing), Lifecycle::Deleted);
        assert!(!runtime.slots().contains_key(&missing));

        assert!(runtime.activate(missing).await.unwrap_err().is_not_found());
        assert_eq!(runtime.hydration_fetches(), 1);
        assert!(!runtime.slots().contains_key(&missing));
    }
}
