//! Persistence queue: serialized, debounced, conflict-aware saves.
//!
//! Every workspace has a lane. Saves for the same workspace run one at a
//! time in FIFO order; saves for different workspaces run in parallel.
//! Debounced saves coalesce: scheduling another replaces the pending one
//! (trailing edge), and an immediate save cancels whatever is pending and
//! captures the ledger as it stands, so both sets of changes land in a
//! single write. A write that has started is never cancelled.
//!
//! Writes carry the version they expect to replace. On a version conflict
//! the newer server copy is merged into the ledger and the write retried.
//! Transport failures back off exponentially. A write that outlives the
//! stall bound releases its lane with a warning but keeps running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::event::{EventBus, EventKind};
use crate::hydration::PreviewCache;
use crate::model::{Lifecycle, SaveStatus, StoredRecord, Version, WorkspaceId, WorkspaceSnapshot};
use crate::runtime::slot::Slot;
use crate::snapshot;
use crate::store::Store;
use crate::telemetry::metrics;
use crate::telemetry::workspace::{record_version, start_save_span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub reason: String,
    /// Skip the debounce window. Used for structural changes (removals,
    /// eviction, explicit flush).
    pub immediate: bool,
}

impl SaveRequest {
    pub fn debounced(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            immediate: false,
        }
    }

    pub fn immediate(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            immediate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved {
        version: Version,
        /// A version conflict was merged before the write went through.
        reconciled: bool,
    },
    /// The store already holds everything the request covered.
    Skipped,
}

/// Completion handle for an immediate save.
pub struct SaveHandle {
    workspace: WorkspaceId,
    task: JoinHandle<Result<SaveOutcome>>,
}

impl SaveHandle {
    pub async fn wait(self) -> Result<SaveOutcome> {
        self.task.await.map_err(|e| {
            Error::Other(format!("save task for workspace {} failed: {e}", self.workspace))
        })?
    }
}

struct PendingSave {
    token: u64,
    timer: JoinHandle<()>,
}

struct Lane {
    writes: Arc<AsyncMutex<()>>,
    pending: Mutex<Option<PendingSave>>,
    tokens: AtomicU64,
}

impl Lane {
    fn new() -> Self {
        Self {
            writes: Arc::new(AsyncMutex::new(())),
            pending: Mutex::new(None),
            tokens: AtomicU64::new(0),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Option<PendingSave>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A fired timer takes its own pending entry. False if it was replaced
    /// or cancelled in the meantime.
    fn claim(&self, token: u64) -> bool {
        let mut pending = self.pending();
        if pending.as_ref().is_some_and(|p| p.token == token) {
            pending.take();
            true
        } else {
            false
        }
    }
}

pub(crate) struct PersistenceQueue {
    store: Arc<dyn Store>,
    config: RuntimeConfig,
    events: Arc<EventBus>,
    previews: Arc<PreviewCache>,
    lanes: Mutex<HashMap<WorkspaceId, Arc<Lane>>>,
}

impl PersistenceQueue {
    pub fn new(
        store: Arc<dyn Store>,
        config: RuntimeConfig,
        events: Arc<EventBus>,
        previews: Arc<PreviewCache>,
    ) -> Self {
        Self {
            store,
            config,
            events,
            previews,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    fn lane(&self, id: WorkspaceId) -> Arc<Lane> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(lanes.entry(id).or_insert_with(|| Arc::new(Lane::new())))
    }

    /// Enqueue a save. Immediate saves return a handle; debounced ones are
    /// fire-and-forget.
    pub fn schedule(self: &Arc<Self>, slot: &Arc<Slot>, request: SaveRequest) -> Option<SaveHandle> {
        if request.immediate {
            Some(self.schedule_immediate(slot, request.reason))
        } else {
            self.schedule_debounced(slot, request.reason);
            None
        }
    }

    pub fn schedule_debounced(self: &Arc<Self>, slot: &Arc<Slot>, reason: String) {
        self.events.emit(
            slot.id,
            EventKind::SaveScheduled {
                reason: reason.clone(),
                immediate: false,
            },
        );
        self.debounce(slot, reason);
    }

    pub fn schedule_immediate(self: &Arc<Self>, slot: &Arc<Slot>, reason: String) -> SaveHandle {
        self.events.emit(
            slot.id,
            EventKind::SaveScheduled {
                reason: reason.clone(),
                immediate: true,
            },
        );
        self.cancel_pending(slot.id);
        let queue = Arc::clone(self);
        let task_slot = Arc::clone(slot);
        let task = tokio::spawn(async move { queue.save_now(&task_slot, &reason).await });
        SaveHandle {
            workspace: slot.id,
            task,
        }
    }

    /// Cancel any pending debounce and write the ledger as it stands.
    pub async fn save_now(self: &Arc<Self>, slot: &Arc<Slot>, reason: &str) -> Result<SaveOutcome> {
        self.cancel_pending(slot.id);
        let requested = slot.lock().ledger.generation();
        self.run_in_lane(slot, requested, reason.to_string(), true)
            .await
    }

    fn debounce(self: &Arc<Self>, slot: &Arc<Slot>, reason: String) {
        let lane = self.lane(slot.id);
        let token = lane.tokens.fetch_add(1, Ordering::Relaxed) + 1;
        let delay = self.config.debounce();

        // Hold the pending slot while spawning so the timer cannot claim
        // before it is registered.
        let mut pending = lane.pending();
        let queue = Arc::clone(self);
        let timer_slot = Arc::clone(slot);
        let timer_lane = Arc::clone(&lane);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !timer_lane.claim(token) {
                return;
            }
            let requested = timer_slot.lock().ledger.generation();
            if let Err(e) = queue.run_in_lane(&timer_slot, requested, reason, false).await {
                warn!(workspace = %timer_slot.id, error = %e, "debounced save failed");
            }
        });
        if let Some(previous) = pending.replace(PendingSave { token, timer }) {
            previous.timer.abort();
        }
    }

    /// Drop a pending debounced save. Returns whether one was pending.
    pub fn cancel_pending(&self, id: WorkspaceId) -> bool {
        let lane = self.lane(id);
        let taken = lane.pending().take();
        match taken {
            Some(p) => {
                p.timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self, id: WorkspaceId) -> bool {
        self.lane(id).pending().is_some()
    }

    /// Wait until the write currently holding the lane (if any) is done.
    pub async fn drain(&self, id: WorkspaceId) {
        let lane = self.lane(id);
        let _turn = lane.writes.lock().await;
    }

    pub fn forget(&self, id: WorkspaceId) {
        self.cancel_pending(id);
        self.lanes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    async fn run_in_lane(
        self: &Arc<Self>,
        slot: &Arc<Slot>,
        requested: u64,
        reason: String,
        immediate: bool,
    ) -> Result<SaveOutcome> {
        let lane = self.lane(slot.id);
        let turn = Arc::clone(&lane.writes).lock_owned().await;

        let span = start_save_span(slot.id, &reason, immediate);
        let queue = Arc::clone(self);
        let task_slot = Arc::clone(slot);
        let mut task =
            tokio::spawn(async move { queue.execute(&task_slot, requested).await }.instrument(span));

        let started = Instant::now();
        let joined = match tokio::time::timeout(self.config.stall_timeout(), &mut task).await {
            Ok(joined) => {
                drop(turn);
                joined
            }
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(workspace = %slot.id, elapsed_ms, %reason, "save stalled, releasing lane");
                metrics::stall_warnings().add(1, &[]);
                self.events
                    .emit(slot.id, EventKind::StallWarning { elapsed_ms });
                drop(turn);
                task.await
            }
        };
        joined.map_err(|e| Error::Other(format!("save task for workspace {} failed: {e}", slot.id)))?
    }

    async fn execute(self: &Arc<Self>, slot: &Arc<Slot>, requested: u64) -> Result<SaveOutcome> {
        let started = Instant::now();
        let mut transport_failures = 0u32;
        let mut conflicts = 0u32;
        let mut reconciled = false;

        loop {
            let (captured, generation, expected) = {
                let mut state = slot.lock();
                let resident = matches!(state.lifecycle, Lifecycle::Hot | Lifecycle::Evicting);
                if !resident || state.persisted_generation >= requested {
                    if resident && !state.ledger.is_dirty() {
                        state.save_status = SaveStatus::Clean;
                    }
                    drop(state);
                    debug!(workspace = %slot.id, requested, "nothing newer to write");
                    metrics::saves().add(1, &[KeyValue::new("result", "skipped")]);
                    self.events.emit(slot.id, EventKind::SaveSkipped);
                    return Ok(SaveOutcome::Skipped);
                }
                let captured = match snapshot::capture(&state.ledger) {
                    Ok(captured) => captured,
                    Err(e) => {
                        state.save_status = SaveStatus::Unsaved;
                        return Err(e);
                    }
                };
                state.save_status = SaveStatus::Saving;
                (captured, state.ledger.generation(), state.version)
            };
            self.events
                .emit(slot.id, EventKind::SaveStarted { expected });

            let failure = match self.store.put(slot.id, &captured, expected).await {
                Ok(version) => {
                    return Ok(self.succeeded(slot, captured, generation, version, reconciled, started));
                }
                Err(Error::VersionConflict { actual, .. }) => {
                    metrics::version_conflicts().add(1, &[]);
                    self.events
                        .emit(slot.id, EventKind::SaveConflict { expected, actual });
                    let conflict = Error::VersionConflict {
                        id: slot.id,
                        expected,
                        actual,
                    };
                    // A write released by the stall guard may already have
                    // landed everything this one carried.
                    if slot.lock().persisted_generation >= requested {
                        continue;
                    }
                    if conflicts >= self.config.conflict_retries {
                        return Err(self.give_up(slot, conflict, SaveStatus::Conflicted, conflicts + 1));
                    }
                    conflicts += 1;
                    match self.store.get(slot.id).await {
                        Ok(latest) => {
                            if let Err(e) = self.adopt(slot, latest) {
                                return Err(self.give_up(slot, e, SaveStatus::Conflicted, conflicts));
                            }
                            reconciled = true;
                            continue;
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            if failure.is_not_found() {
                self.deleted_remotely(slot);
                return Err(self.give_up(slot, failure, SaveStatus::Unsaved, transport_failures + 1));
            }
            if !failure.is_retryable() {
                return Err(self.give_up(slot, failure, SaveStatus::Unsaved, transport_failures + 1));
            }

            transport_failures += 1;
            if transport_failures > self.config.max_transport_retries {
                return Err(self.give_up(slot, failure, SaveStatus::Unsaved, transport_failures));
            }
            let delay = self.config.backoff(transport_failures);
            warn!(
                workspace = %slot.id,
                attempt = transport_failures,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "save failed, backing off"
            );
            self.events.emit(
                slot.id,
                EventKind::SaveFailed {
                    error: failure.to_string(),
                    retryable: true,
                    attempt: transport_failures,
                },
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn succeeded(
        self: &Arc<Self>,
        slot: &Arc<Slot>,
        captured: WorkspaceSnapshot,
        generation: u64,
        version: Version,
        reconciled: bool,
        started: Instant,
    ) -> SaveOutcome {
        let duration_ms = started.elapsed().as_millis() as u64;
        let entities = captured.entity_count();
        let still_dirty = {
            let mut state = slot.lock();
            state.version = state.version.max(version);
            let confirmed = state.ledger.commit(generation);
            state.persisted_generation = state.persisted_generation.max(generation);
            state.base = Some(captured.clone());
            if let Some(meta) = state.meta.as_mut() {
                meta.updated_at = Utc::now();
            }
            let dirty = state.ledger.is_dirty();
            state.save_status = if dirty {
                SaveStatus::Dirty
            } else {
                SaveStatus::Clean
            };
            if !confirmed.is_empty() {
                debug!(workspace = %slot.id, confirmed = confirmed.len(), "deletions confirmed");
            }
            dirty && state.lifecycle == Lifecycle::Hot
        };

        self.previews.store(slot.id, captured);
        record_version(&Span::current(), version.0);
        metrics::saves().add(1, &[KeyValue::new("result", "saved")]);
        metrics::save_duration_ms().record(duration_ms as f64, &[]);
        self.events.emit(
            slot.id,
            EventKind::SaveSucceeded {
                version,
                duration_ms,
                entities,
            },
        );
        info!(workspace = %slot.id, %version, entities, duration_ms, reconciled, "workspace saved");

        if still_dirty {
            self.debounce(slot, "changes during save".to_string());
        }
        SaveOutcome::Saved {
            version,
            reconciled,
        }
    }

    /// Merge the server's newer record into the ledger.
    fn adopt(&self, slot: &Slot, latest: StoredRecord) -> Result<()> {
        let server = match latest.payload {
            Some(payload) => snapshot::upgrade(payload)?,
            None => WorkspaceSnapshot::empty(),
        };
        let mut guard = slot.lock();
        let state = &mut *guard;
        let report = snapshot::reconcile(&mut state.ledger, state.base.as_ref(), &server)?;
        info!(
            workspace = %slot.id,
            version = %latest.version,
            adopted = report.adopted.len(),
            dropped = report.dropped.len(),
            kept_local = report.kept_local.len(),
            skipped_deleted = report.skipped_deleted.len(),
            "reconciled with newer server copy"
        );
        state.version = latest.version;
        state.base = Some(server);
        state.meta = Some(latest.workspace);
        Ok(())
    }

    fn deleted_remotely(&self, slot: &Slot) {
        let mut state = slot.lock();
        if state.lifecycle == Lifecycle::Deleted {
            return;
        }
        warn!(workspace = %slot.id, "workspace no longer exists in the store");
        if let Err(e) = slot.transition(&mut state, Lifecycle::Deleted, &self.events) {
            warn!(workspace = %slot.id, error = %e, "cannot mark workspace deleted");
        }
        state.ledger.unload();
        drop(state);
        self.previews.remove(slot.id);
    }

    /// Surface a terminal failure. The ledger stays dirty, so the next
    /// mutation or explicit flush retries.
    fn give_up(&self, slot: &Slot, error: Error, status: SaveStatus, attempt: u32) -> Error {
        {
            let mut state = slot.lock();
            if state.lifecycle != Lifecycle::Deleted {
                state.save_status = status;
            }
        }
        let result = if status == SaveStatus::Conflicted {
            "conflicted"
        } else {
            "failed"
        };
        metrics::saves().add(1, &[KeyValue::new("result", result)]);
        warn!(workspace = %slot.id, error = %error, attempt, status = ?status, "save gave up; retry on next change or flush");
        self.events.emit(
            slot.id,
            EventKind::SaveFailed {
                error: error.to_string(),
                retryable: error.is_retryable(),
                attempt,
            },
        );
        error
    }
}
