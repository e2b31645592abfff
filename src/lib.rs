//! # canvas-runtime
//!
//! Workspace runtime and persistence engine for a multi-panel canvas
//! note-taking app.
//!
//! Keeps a bounded set of workspaces hot in memory, snapshots their visual
//! state (panels, components, camera) to a versioned Postgres store with
//! debounced, conflict-aware saves, and never lets a deleted entity come
//! back from a stale snapshot. OpenTelemetry observability throughout.

pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod hydration;
pub mod model;
pub mod persistence;
pub mod runtime;
pub mod snapshot;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
pub use persistence::{SaveHandle, SaveOutcome, SaveRequest};
pub use runtime::RuntimeManager;
