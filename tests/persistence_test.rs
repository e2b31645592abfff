//! Integration tests for the persistence queue as seen through the runtime:
//! debounce coalescing, retries, conflicts and the stall guard.

mod common;

use std::time::Duration;

use canvas_runtime::config::RuntimeConfig;
use canvas_runtime::event::EventKind;
use canvas_runtime::model::{EntityId, Lifecycle, Point, SaveStatus, Version, WorkspaceSnapshot};
use canvas_runtime::persistence::SaveOutcome;
use canvas_runtime::store::Store;
use common::{component, hot_default, persisted};

fn config() -> RuntimeConfig {
    RuntimeConfig::default()
}

fn position_of(snapshot: &WorkspaceSnapshot, id: EntityId) -> Option<Point> {
    snapshot
        .components
        .iter()
        .find(|c| c.id == id)
        .map(|c| c.position)
}

#[tokio::test(start_paused = true)]
async fn rapid_moves_coalesce_into_one_write() {
    let (runtime, store, workspace) = hot_default(config()).await;
    let id = workspace.id;
    let note = runtime
        .add_component(id, component(id, "sticky", 0.0, 0.0))
        .unwrap();
    runtime.flush(id).await.unwrap();
    assert_eq!(store.puts(), 1);

    for step in 1..=5 {
        runtime
            .move_entity(id, note, Point::new(step as f64 * 10.0, 0.0))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.puts(), 1, "nothing written inside the debounce window");

    tokio::time::sleep(config().debounce() + Duration::from_millis(100)).await;
    assert_eq!(store.puts(), 2);
    assert_eq!(
        position_of(&persisted(&store, id).await, note),
        Some(Point::new(50.0, 0.0))
    );
    assert_eq!(runtime.save_status(id), Some(SaveStatus::Clean));
}

#[tokio::test(start_paused = true)]
async fn immediate_save_absorbs_pending_debounce() {
    let (runtime, store, workspace) = hot_default(config()).await;
    let id = workspace.id;
    let a = runtime
        .add_component(id, component(id, "sticky", 0.0, 0.0))
        .unwrap();
    let b = runtime
        .add_component(id, component(id, "sticky", 200.0, 0.0))
        .unwrap();
    runtime.flush(id).await.unwrap();

    runtime.move_entity(id, a, Point::new(75.0, 75.0)).unwrap();
    assert!(runtime.has_pending_save(id));
    let outcome = runtime.remove_entity(id, b).unwrap().wait().await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { reconciled: false, .. }));
    assert!(!runtime.has_pending_save(id));

    tokio::time::sleep(config().debounce() * 2).await;
    assert_eq!(store.puts(), 2);
    let stored = persisted(&store, id).await;
    assert_eq!(position_of(&stored, a), Some(Point::new(75.0, 75.0)));
    assert_eq!(position_of(&stored, b), None);
}

#[tokio::test(start_paused = true)]
async fn flush_without_changes_is_skipped() {
    let (runtime, store, workspace) = hot_default(config()).await;
    let id = workspace.id;
    runtime
        .add_component(id, component(id, "sticky", 0.0, 0.0))
        .unwrap();

    let first = runtime.flush(id).await.unwrap();
    assert_eq!(
        first,
        SaveOutcome::Saved {
            version: Version(1),
            reconciled: false
        }
    );
    assert_eq!(runtime.flush(id).await.unwrap(), SaveOutcome::Skipped);
    assert_eq!(store.puts(), 1);
    assert_eq!(runtime.version(id), Some(Version(1)));
}

#[tokio::test(start_paused = true)]
async fn transport_failures_back_off_then_succeed() {
    let (runtime, store, workspace) = hot_default(config()).await;
    let id = workspace.id;
    runtime
        .add_component(id, component(id, "sticky", 0.0, 0.0))
        .unwrap();
    store.fail_next_puts(2);

    let outcome = runtime.flush(id).await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { .. }));
    assert_eq!(store.puts(), 3);
    assert_eq!(runtime.save_status(id), Some(SaveStatus::Clean));

    let attempts: Vec<u32> = runtime
        .events_since(0)
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::SaveFailed {
                attempt,
                retryable: true,
                ..
            } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_leave_workspace_unsaved() {
    let (runtime, store, workspace) = hot_default(RuntimeConfig {
        max_transport_retries: 2,
        ..config()
    })
    .await;
    let id = workspace.id;
    let note = runtime
        .add_component(id, component(id, "sticky", 0.0, 0.0))
        .unwrap();
    store.fail_next_puts(100);

    let err = runtime.flush(id).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(store.puts(), 3);
    assert_eq!(runtime.save_status(id), Some(SaveStatus::Unsaved));
    // Local state is untouched.
    assert!(runtime.entity(id, note).is_some());

    store.fail_next_puts(0);
    assert!(matches!(
        runtime.flush(id).await.unwrap(),
        SaveOutcome::Saved { .. }
    ));
    assert_eq!(runtime.save_status(id), Some(SaveStatus::Clean));
}

#[tokio::test(start_paused = true)]
async fn version_conflict_merges_server_changes_and_retries() {
    let (runtime, store, workspace) = hot_default(config()).await;
    let id = workspace.id;
    let a = runtime
        .add_component(id, component(id, "sticky", 0.0, 0.0))
        .unwrap();
    let b = runtime
        .add_component(id, component(id, "sticky", 200.0, 0.0))
        .unwrap();
    runtime.flush(id).await.unwrap();

    // Another tab moves B.
    let mut remote = persisted(&store, id).await;
    for c in &mut remote.components {
        if c.id == b {
            c.position = Point::new(500.0, 500.0);
        }
    }
    store.inner().put(id, &remote, Version(1)).await.unwrap();

    runtime.move_entity(id, a, Point::new(42.0, 42.0)).unwrap();
    let outcome = runtime.flush(id).await.unwrap();
    assert_eq!(
        outcome,
        SaveOutcome::Saved {
            version: Version(3),
            reconciled: true
        }
    );

    let stored = persisted(&store, id).await;
    assert_eq!(position_of(&stored, a), Some(Point::new(42.0, 42.0)));
    assert_eq!(position_of(&stored, b), Some(Point::new(500.0, 500.0)));
    assert_eq!(
        runtime.entity(id, b).unwrap().position(),
        Point::new(500.0, 500.0)
    );
    assert!(
        runtime
            .events_since(0)
            .iter()
            .any(|e| matches!(e.kind, EventKind::SaveConflict { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_conflict_retries_leave_workspace_conflicted() {
    let (runtime, store, workspace) = hot_default(RuntimeConfig {
        conflict_retries: 0,
        ..config()
    })
    .await;
    let id = workspace.id;
    let a = runtime
        .add_component(id, component(id, "sticky", 0.0, 0.0))
        .unwrap();
    runtime.flush(id).await.unwrap();

    // Another tab saves over us.
    let remote = persisted(&store, id).await;
    store.inner().put(id, &remote, Version(1)).await.unwrap();

    runtime.move_entity(id, a, Point::new(5.0, 5.0)).unwrap();
    let err = runtime.flush(id).await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(runtime.save_status(id), Some(SaveStatus::Conflicted));
    assert_eq!(runtime.version(id), Some(Version(1)));
    assert_eq!(
        runtime.entity(id, a).unwrap().position(),
        Point::new(5.0, 5.0)
    );
    assert_eq!(
        position_of(&persisted(&store, id).await, a),
        Some(Point::new(0.0, 0.0))
    );
    assert!(runtime.events_since(0).iter().any(|e| matches!(
        e.kind,
        EventKind::SaveFailed {
            retryable: false,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn stalled_write_releases_lane_for_next_save() {
    let (runtime, store, workspace) = hot_default(RuntimeConfig {
        stall_timeout_ms: 1_000,
        ..config()
    })
    .await;
    let id = workspace.id;
    let a = runtime
        .add_component(id, component(id, "sticky", 0.0, 0.0))
        .unwrap();
    let b = runtime
        .add_component(id, component(id, "sticky", 200.0, 0.0))
        .unwrap();
    runtime.flush(id).await.unwrap();
    let before = store.puts();
    store.set_put_delay(Duration::from_secs(3));

    runtime.move_entity(id, a, Point::new(10.0, 10.0)).unwrap();
    let first = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.flush(id).await }
    });

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(
        runtime
            .events_since(0)
            .iter()
            .any(|e| matches!(e.kind, EventKind::StallWarning { .. }))
    );

    runtime.move_entity(id, b, Point::new(210.0, 10.0)).unwrap();
    let second = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.flush(id).await }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.puts(), before + 2, "second write started while first in flight");

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let stored = persisted(&store, id).await;
    assert_eq!(position_of(&stored, a), Some(Point::new(10.0, 10.0)));
    assert_eq!(position_of(&stored, b), Some(Point::new(210.0, 10.0)));
    assert_eq!(runtime.save_status(id), Some(SaveStatus::Clean));
}

#[tokio::test(start_paused = true)]
async fn record_deleted_elsewhere_moves_workspace_to_deleted() {
    let (runtime, store, workspace) = hot_default(config()).await;
    let id = workspace.id;
    runtime
        .add_component(id, component(id, "sticky", 0.0, 0.0))
        .unwrap();
    runtime.flush(id).await.unwrap();

    store.inner().delete(id).await.unwrap();
    runtime.mark_dirty(id, "camera nudge").unwrap();
    let err = runtime.flush(id).await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(runtime.lifecycle(id), Lifecycle::Deleted);
    assert!(runtime.view(id).is_err());
}
