//! Hydration: load a workspace's persisted snapshot from the store.
//!
//! Concurrent activations of the same workspace share one fetch. The first
//! caller creates a shared future; everyone else joins it and observes the
//! same outcome, failure included. The entry is retired by the runtime once
//! the outcome is installed, under the workspace's slot lock, so a late
//! joiner can never start a second fetch for the same hydration.

pub mod preview;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use opentelemetry::KeyValue;
use tracing::{Instrument, Span, debug};

use crate::error::{Error, Result};
use crate::model::{StoredRecord, WorkspaceId, WorkspaceSnapshot};
use crate::snapshot;
use crate::store::Store;
use crate::telemetry::metrics;
use crate::telemetry::workspace::{record_version, start_hydrate_span};

pub use preview::PreviewCache;

/// A fetched and validated record, ready to apply.
#[derive(Debug)]
pub struct Hydrated {
    pub record: StoredRecord,
    /// The payload upgraded to the current schema; empty if never saved.
    pub snapshot: WorkspaceSnapshot,
}

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<Arc<Hydrated>, Arc<Error>>>>;

/// Handle on a (possibly shared) fetch.
pub struct HydrationFuture {
    id: WorkspaceId,
    inner: SharedFetch,
}

impl HydrationFuture {
    pub async fn wait(self) -> Result<Arc<Hydrated>> {
        let id = self.id;
        self.inner
            .await
            .map_err(|source| Error::Hydration { id, source })
    }
}

pub struct Hydrator {
    store: Arc<dyn Store>,
    inflight: Mutex<HashMap<WorkspaceId, SharedFetch>>,
    fetches: AtomicU64,
}

impl Hydrator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            inflight: Mutex::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    fn inflight(&self) -> std::sync::MutexGuard<'_, HashMap<WorkspaceId, SharedFetch>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join the in-flight fetch for `id`, or start one. The fetch runs when
    /// first polled.
    pub fn fetch(&self, id: WorkspaceId) -> HydrationFuture {
        let mut inflight = self.inflight();
        if let Some(existing) = inflight.get(&id) {
            debug!(workspace = %id, "joining in-flight hydration");
            return HydrationFuture {
                id,
                inner: existing.clone(),
            };
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let shared = async move { load(store, id).await.map(Arc::new).map_err(Arc::new) }
            .boxed()
            .shared();
        inflight.insert(id, shared.clone());
        HydrationFuture { id, inner: shared }
    }

    /// Retire the fetch for `id` once its outcome has been installed.
    pub fn finish(&self, id: WorkspaceId) {
        self.inflight().remove(&id);
    }

    pub fn in_flight(&self, id: WorkspaceId) -> bool {
        self.inflight().contains_key(&id)
    }

    /// Fetches started since creation, joins excluded.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

async fn load(store: Arc<dyn Store>, id: WorkspaceId) -> Result<Hydrated> {
    let span = start_hydrate_span(id);
    let result = async {
        let record = store.get(id).await?;
        let snapshot = match &record.payload {
            Some(payload) => snapshot::upgrade(payload.clone())?,
            None => WorkspaceSnapshot::empty(),
        };
        snapshot::validate(id, &snapshot)?;
        record_version(&Span::current(), record.version.0);
        Ok::<_, Error>(Hydrated { record, snapshot })
    }
    .instrument(span)
    .await;

    let label = if result.is_ok() { "ok" } else { "error" };
    metrics::hydrations().add(1, &[KeyValue::new("result", label)]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryId, Workspace};
    use crate::store::{MemoryStore, Store};

    #[tokio::test]
    async fn concurrent_fetches_share_one_load() {
        let store = Arc::new(MemoryStore::new());
        let ws = Workspace::new(EntryId::new(), "Plans", false).unwrap();
        store.create(&ws).await.unwrap();
        let hydrator = Hydrator::new(store);

        let a = hydrator.fetch(ws.id);
        let b = hydrator.fetch(ws.id);
        let (a, b) = tokio::join!(a.wait(), b.wait());
        assert_eq!(a.unwrap().record.version, b.unwrap().record.version);
        assert_eq!(hydrator.fetch_count(), 1);

        hydrator.finish(ws.id);
        assert!(!hydrator.in_flight(ws.id));
    }

    #[tokio::test]
    async fn failures_are_shared_and_wrapped() {
        let hydrator = Hydrator::new(Arc::new(MemoryStore::new()));
        let missing = WorkspaceId::new();
        let a = hydrator.fetch(missing);
        let b = hydrator.fetch(missing);
        let (a, b) = tokio::join!(a.wait(), b.wait());
        for result in [a, b] {
            let err = result.unwrap_err();
            assert!(matches!(err, Error::Hydration { .. }));
            assert!(err.is_not_found());
        }
        assert_eq!(hydrator.fetch_count(), 1);
    }
}
