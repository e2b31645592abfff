//! Per-workspace state cell shared by the manager, the persistence queue and
//! hydration.
//!
//! All ledger and tombstone mutation for a workspace happens under its slot
//! lock. The lock is a plain mutex and is never held across an `.await`.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::Span;

use super::ledger::Ledger;
use crate::error::{Error, Result};
use crate::event::{EventBus, EventKind};
use crate::model::{Lifecycle, SaveStatus, Version, Workspace, WorkspaceId, WorkspaceSnapshot};
use crate::telemetry::workspace::record_state_transition;

pub(crate) struct Slot {
    pub id: WorkspaceId,
    state: Mutex<SlotState>,
    /// Woken on every lifecycle transition, for callers waiting out
    /// `Hydrating` or `Evicting`.
    settled: Notify,
}

pub(crate) struct SlotState {
    pub meta: Option<Workspace>,
    pub lifecycle: Lifecycle,
    pub ledger: Ledger,
    /// Version of the record this ledger was last synced with.
    pub version: Version,
    /// Snapshot last written or loaded; the merge base for reconciliation.
    pub base: Option<WorkspaceSnapshot>,
    /// Highest ledger generation the store has acknowledged.
    pub persisted_generation: u64,
    pub save_status: SaveStatus,
    /// Explicit eviction guard set by the embedding application.
    pub protected: bool,
    pub last_touched: Instant,
    /// Bumped whenever a hydration starts; stale completions are ignored.
    pub epoch: u64,
}

impl SlotState {
    pub fn touch(&mut self) {
        self.last_touched = Instant::now();
    }
}

impl Slot {
    pub fn new(id: WorkspaceId) -> Self {
        Self {
            id,
            state: Mutex::new(SlotState {
                meta: None,
                lifecycle: Lifecycle::Unloaded,
                ledger: Ledger::new(id),
                version: Version::default(),
                base: None,
                persisted_generation: 0,
                save_status: SaveStatus::Clean,
                protected: false,
                last_touched: Instant::now(),
                epoch: 0,
            }),
            settled: Notify::new(),
        }
    }

    pub fn with_meta(workspace: Workspace) -> Self {
        let slot = Self::new(workspace.id);
        slot.lock().meta = Some(workspace);
        slot
    }

    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate and apply a lifecycle transition, then notify waiters.
    pub fn transition(&self, state: &mut SlotState, to: Lifecycle, events: &EventBus) -> Result<()> {
        let from = state.lifecycle;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        state.lifecycle = to;
        record_state_transition(&Span::current(), &from.to_string(), &to.to_string());
        events.emit(self.id, EventKind::StateTransition { from, to });
        self.settled.notify_waiters();
        Ok(())
    }

    /// Future that resolves on the next transition. Create it while holding
    /// the lock, await it after releasing.
    pub fn settled(&self) -> tokio::sync::futures::Notified<'_> {
        self.settled.notified()
    }
}
