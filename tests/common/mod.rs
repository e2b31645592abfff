//! Shared fixtures: a store wrapper with call counters, injected transport
//! failures and artificial latency.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use canvas_runtime::config::RuntimeConfig;
use canvas_runtime::error::{Error, Result};
use canvas_runtime::model::{
    Component, EntryId, Point, Size, StoredRecord, Version, Workspace, WorkspaceId,
    WorkspaceSnapshot,
};
use canvas_runtime::runtime::RuntimeManager;
use canvas_runtime::store::{MemoryStore, Store};

#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    puts: AtomicUsize,
    failing_gets: AtomicUsize,
    failing_puts: AtomicUsize,
    get_delay: Mutex<Duration>,
    put_delay: Mutex<Duration>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The wrapped store, for writes that bypass counters and faults
    /// (another tab saving the same record).
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Put attempts, failed ones included.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn fail_next_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = delay;
    }

    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = delay;
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn pause(delay: &Mutex<Duration>) {
        let delay = *delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, id: WorkspaceId) -> Result<StoredRecord> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Self::pause(&self.get_delay).await;
        if Self::take_failure(&self.failing_gets) {
            return Err(Error::Transport("injected get failure".into()));
        }
        self.inner.get(id).await
    }

    async fn put(
        &self,
        id: WorkspaceId,
        snapshot: &WorkspaceSnapshot,
        expected: Version,
    ) -> Result<Version> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Self::pause(&self.put_delay).await;
        if Self::take_failure(&self.failing_puts) {
            return Err(Error::Transport("injected put failure".into()));
        }
        self.inner.put(id, snapshot, expected).await
    }

    async fn delete(&self, id: WorkspaceId) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn create(&self, workspace: &Workspace) -> Result<StoredRecord> {
        self.inner.create(workspace).await
    }

    async fn rename(&self, id: WorkspaceId, name: &str) -> Result<Workspace> {
        self.inner.rename(id, name).await
    }

    async fn list(&self, entry: EntryId) -> Result<Vec<Workspace>> {
        self.inner.list(entry).await
    }
}

pub fn runtime(store: &Arc<FlakyStore>, config: RuntimeConfig) -> RuntimeManager {
    RuntimeManager::new(store.clone(), config)
}

/// A runtime over a fresh store with the entry's default workspace hot.
pub async fn hot_default(config: RuntimeConfig) -> (RuntimeManager, Arc<FlakyStore>, Workspace) {
    let store = FlakyStore::new();
    let runtime = runtime(&store, config);
    let workspace = runtime.open_entry(EntryId::new()).await.unwrap();
    runtime.activate(workspace.id).await.unwrap();
    (runtime, store, workspace)
}

pub fn component(workspace: WorkspaceId, kind: &str, x: f64, y: f64) -> Component {
    Component::new(workspace, kind, Point::new(x, y), Size::new(160.0, 120.0))
}

pub async fn persisted(store: &FlakyStore, id: WorkspaceId) -> WorkspaceSnapshot {
    store
        .inner()
        .get(id)
        .await
        .unwrap()
        .payload
        .expect("workspace was never saved")
}
