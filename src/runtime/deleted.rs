//! Per-workspace tombstones for explicitly removed entities.
//!
//! An id stays here from the moment the user removes the entity until a save
//! whose snapshot omits it has been acknowledged by the store. While it is
//! here, no path may put the entity back into the ledger.

use std::collections::HashMap;

use crate::model::EntityId;

#[derive(Debug, Clone, Default)]
pub struct DeletedSet {
    /// entity -> ledger generation at which it was removed
    entries: HashMap<EntityId, u64>,
}

impl DeletedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: EntityId, generation: u64) {
        self.entries.insert(id, generation);
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drop tombstones whose removal is covered by a durable save of
    /// `generation`. Returns the confirmed ids.
    pub fn confirm_through(&mut self, generation: u64) -> Vec<EntityId> {
        let confirmed: Vec<EntityId> = self
            .entries
            .iter()
            .filter(|(_, g)| **g <= generation)
            .map(|(id, _)| *id)
            .collect();
        for id in &confirmed {
            self.entries.remove(id);
        }
        confirmed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_only_clears_covered_generations() {
        let mut set = DeletedSet::new();
        let early = EntityId::new();
        let late = EntityId::new();
        set.insert(early, 3);
        set.insert(late, 7);

        let confirmed = set.confirm_through(5);
        assert_eq!(confirmed, vec![early]);
        assert!(!set.contains(early));
        assert!(set.contains(late));
    }
}
