//! Last-known snapshots kept after a workspace goes cold, rendered
//! optimistically while the authoritative fetch is in flight.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::model::{WorkspaceId, WorkspaceSnapshot};

struct Preview {
    snapshot: WorkspaceSnapshot,
    cached_at: Instant,
}

pub struct PreviewCache {
    max_age: Duration,
    entries: Mutex<HashMap<WorkspaceId, Preview>>,
}

impl PreviewCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<WorkspaceId, Preview>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the preview for a workspace. Called after every acknowledged
    /// write so a preview never predates a confirmed deletion.
    pub fn store(&self, id: WorkspaceId, snapshot: WorkspaceSnapshot) {
        self.entries().insert(
            id,
            Preview {
                snapshot,
                cached_at: Instant::now(),
            },
        );
    }

    /// The preview if it is younger than the staleness bound. Stale entries
    /// are dropped on the way out.
    pub fn fresh(&self, id: WorkspaceId) -> Option<WorkspaceSnapshot> {
        let mut entries = self.entries();
        let preview = entries.get(&id)?;
        if preview.cached_at.elapsed() > self.max_age {
            entries.remove(&id);
            return None;
        }
        Some(preview.snapshot.clone())
    }

    pub fn remove(&self, id: WorkspaceId) {
        self.entries().remove(&id);
    }

    pub fn contains(&self, id: WorkspaceId) -> bool {
        self.entries().contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stale_previews_are_discarded() {
        let cache = PreviewCache::new(Duration::from_secs(30));
        let ws = WorkspaceId::new();
        cache.store(ws, WorkspaceSnapshot::empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.fresh(ws).is_some());

        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(cache.fresh(ws).is_none());
        assert!(!cache.contains(ws));
    }
}
