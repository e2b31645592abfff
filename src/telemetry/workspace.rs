//! Span helpers for workspace saves, hydrations and lifecycle transitions.

use tracing::Span;

use crate::model::WorkspaceId;

/// Start a span for one save task. `workspace.version` is filled in once the
/// store acknowledges the write.
pub fn start_save_span(workspace: WorkspaceId, reason: &str, immediate: bool) -> Span {
    tracing::info_span!(
        "workspace.save",
        "workspace.id" = %workspace,
        "save.reason" = reason,
        "save.immediate" = immediate,
        "workspace.version" = tracing::field::Empty,
    )
}

/// Start a span for a hydration fetch.
pub fn start_hydrate_span(workspace: WorkspaceId) -> Span {
    tracing::info_span!(
        "workspace.hydrate",
        "workspace.id" = %workspace,
        "workspace.version" = tracing::field::Empty,
    )
}

pub fn record_version(span: &Span, version: u64) {
    span.record("workspace.version", version);
}

/// Record a lifecycle transition as an event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
