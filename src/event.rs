//! Structured events emitted by the runtime on every lifecycle and save step.
//!
//! Status indicators, telemetry exporters and tests subscribe here. Events are
//! the runtime's voice; `tracing` logs are its diary.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{EntityId, EntryId, Lifecycle, Version, WorkspaceId};

/// A structured event emitted by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub workspace_id: WorkspaceId,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SaveScheduled {
        reason: String,
        immediate: bool,
    },
    SaveStarted {
        expected: Version,
    },
    SaveSucceeded {
        version: Version,
        duration_ms: u64,
        entities: usize,
    },
    /// Nothing newer than what the store already holds.
    SaveSkipped,
    SaveFailed {
        error: String,
        retryable: bool,
        attempt: u32,
    },
    SaveConflict {
        expected: Version,
        actual: Version,
    },
    /// A write outlived the stall bound; its lane was released.
    StallWarning {
        elapsed_ms: u64,
    },
    HydrationStarted {
        optimistic: bool,
    },
    Hydrated {
        version: Version,
        skipped_deleted: usize,
    },
    HydrationFailed {
        error: String,
        retryable: bool,
    },
    StateTransition {
        from: Lifecycle,
        to: Lifecycle,
    },
    EntityRemoved {
        entity_id: EntityId,
    },
    EvictionRefused {
        reason: String,
    },
    ActiveChanged {
        entry_id: EntryId,
        previous: Option<WorkspaceId>,
    },
}

impl EventKind {
    /// Short label used for metrics and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::SaveScheduled { .. } => "save-scheduled",
            EventKind::SaveStarted { .. } => "save-started",
            EventKind::SaveSucceeded { .. } => "save-succeeded",
            EventKind::SaveSkipped => "save-skipped",
            EventKind::SaveFailed { .. } => "save-failed",
            EventKind::SaveConflict { .. } => "save-conflict",
            EventKind::StallWarning { .. } => "stall-warning",
            EventKind::HydrationStarted { .. } => "hydration-started",
            EventKind::Hydrated { .. } => "hydrated",
            EventKind::HydrationFailed { .. } => "hydration-failed",
            EventKind::StateTransition { .. } => "state-transition",
            EventKind::EntityRemoved { .. } => "entity-removed",
            EventKind::EvictionRefused { .. } => "eviction-refused",
            EventKind::ActiveChanged { .. } => "active-changed",
        }
    }
}

/// Fan-out of runtime events plus a bounded journal for late readers.
pub struct EventBus {
    seq: AtomicU64,
    tx: broadcast::Sender<Event>,
    journal: Mutex<VecDeque<Event>>,
    journal_capacity: usize,
}

impl EventBus {
    pub fn new(journal_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(journal_capacity.max(16));
        Self {
            seq: AtomicU64::new(0),
            tx,
            journal: Mutex::new(VecDeque::with_capacity(journal_capacity)),
            journal_capacity,
        }
    }

    /// Stamp, journal and broadcast an event.
    pub fn emit(&self, workspace_id: WorkspaceId, kind: EventKind) -> Event {
        let event = {
            let mut journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
            // seq is taken under the journal lock so the journal stays ordered
            let event = Event {
                seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
                timestamp: Utc::now(),
                workspace_id,
                kind,
            };
            if self.journal_capacity > 0 {
                if journal.len() == self.journal_capacity {
                    journal.pop_front();
                }
                journal.push_back(event.clone());
            }
            event
        };
        tracing::debug!(
            workspace = %workspace_id,
            seq = event.seq,
            event = event.kind.label(),
            "event"
        );
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Journaled events with `seq > since_seq`, oldest first.
    pub fn since(&self, since_seq: u64) -> Vec<Event> {
        let journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        journal
            .iter()
            .filter(|e| e.seq > since_seq)
            .cloned()
            .collect()
    }

    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}
