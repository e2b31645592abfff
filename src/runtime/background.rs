//! Background-operation contracts.
//!
//! A component type can register a contract that reports whether an
//! instance is doing work that must survive (a running timer, an upload).
//! Workspaces holding such a component are protected from eviction.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::model::{Component, WorkspaceId};

use super::ledger::Ledger;

pub trait BackgroundOperation: Send + Sync {
    fn is_running(&self, workspace: WorkspaceId, component: &Component) -> bool;

    fn start(&self, workspace: WorkspaceId, component: &Component) -> Result<()>;

    /// Stop the operation. Called before a forced eviction.
    fn stop(&self, workspace: WorkspaceId, component: &Component);
}

/// Contracts keyed by component type.
#[derive(Default)]
pub struct BackgroundRegistry {
    contracts: RwLock<HashMap<String, Arc<dyn BackgroundOperation>>>,
}

impl BackgroundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, component_type: impl Into<String>, op: Arc<dyn BackgroundOperation>) {
        self.contracts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(component_type.into(), op);
    }

    pub fn contract(&self, component_type: &str) -> Option<Arc<dyn BackgroundOperation>> {
        self.contracts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(component_type)
            .cloned()
    }

    /// Components of `ledger` with a running background operation, paired
    /// with their contract.
    pub fn running(&self, ledger: &Ledger) -> Vec<(Arc<dyn BackgroundOperation>, Component)> {
        let contracts = self.contracts.read().unwrap_or_else(|e| e.into_inner());
        if contracts.is_empty() {
            return Vec::new();
        }
        let workspace = ledger.workspace_id();
        ledger
            .components()
            .filter_map(|component| {
                let op = contracts.get(&component.component_type)?;
                op.is_running(workspace, component)
                    .then(|| (Arc::clone(op), component.clone()))
            })
            .collect()
    }
}
