//! Point-in-time serialized state and the change sets derived from two of
//! them.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::lock_order::LockTotalOrderRegistry;
use crate::model::{AggregateType, EntityId};

/// Serialized state of every tracked aggregate, keyed by type then id.
///
/// Entries are never modified after the snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    states: BTreeMap<AggregateType, BTreeMap<EntityId, Value>>,
}

impl Snapshot {
    pub(crate) fn from_states(states: BTreeMap<AggregateType, BTreeMap<EntityId, Value>>) -> Self {
        Self { states }
    }

    pub fn get(&self, aggregate_type: AggregateType, entity_id: EntityId) -> Option<&Value> {
        self.states.get(&aggregate_type)?.get(&entity_id)
    }

    pub fn len(&self) -> usize {
        self.states.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classifies every id seen in either snapshot. `self` is the earlier
    /// state. Ids whose serialized state is identical in both produce
    /// nothing.
    pub fn diff(&self, later: &Snapshot) -> ResourceChanges {
        let empty = BTreeMap::new();
        let mut changes = BTreeMap::new();

        for &aggregate_type in AggregateType::ALL {
            let before = self.states.get(&aggregate_type).unwrap_or(&empty);
            let after = later.states.get(&aggregate_type).unwrap_or(&empty);
            let mut difference = Difference::default();

            for (&entity_id, state) in after {
                match before.get(&entity_id) {
                    None => difference.created.push(SnapshotEntry {
                        entity_id,
                        state: state.clone(),
                    }),
                    Some(original) if original != state => {
                        difference.updated.push(UpdatedEntry {
                            entity_id,
                            before: original.clone(),
                            after: state.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
            for (&entity_id, state) in before {
                if !after.contains_key(&entity_id) {
                    difference.deleted.push(SnapshotEntry {
                        entity_id,
                        state: state.clone(),
                    });
                }
            }

            if !difference.is_empty() {
                changes.insert(aggregate_type, difference);
            }
        }

        ResourceChanges(changes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    pub entity_id: EntityId,
    pub state: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatedEntry {
    pub entity_id: EntityId,
    pub before: Value,
    pub after: Value,
}

/// Changes to one aggregate type, each list sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Difference {
    pub created: Vec<SnapshotEntry>,
    pub updated: Vec<UpdatedEntry>,
    pub deleted: Vec<SnapshotEntry>,
}

impl Difference {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Which change, if any, this difference records for `entity_id`.
    pub fn kind_of(&self, entity_id: EntityId) -> Option<ChangeKind> {
        if self.created.iter().any(|e| e.entity_id == entity_id) {
            Some(ChangeKind::Created)
        } else if self.updated.iter().any(|e| e.entity_id == entity_id) {
            Some(ChangeKind::Updated)
        } else if self.deleted.iter().any(|e| e.entity_id == entity_id) {
            Some(ChangeKind::Deleted)
        } else {
            None
        }
    }
}

/// Per-type differences. Types without changes are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceChanges(BTreeMap<AggregateType, Difference>);

impl ResourceChanges {
    pub fn get(&self, aggregate_type: AggregateType) -> Option<&Difference> {
        self.0.get(&aggregate_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AggregateType, &Difference)> {
        self.0.iter().map(|(&t, d)| (t, d))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = AggregateType> + '_ {
        self.0.keys().copied()
    }

    /// Consumes the change set in the registry's backward order, dependents
    /// first. This is the order writes reach the store.
    pub fn into_ordered(mut self, registry: &LockTotalOrderRegistry) -> Vec<(AggregateType, Difference)> {
        registry
            .backward()
            .filter_map(|t| self.0.remove(&t).map(|d| (t, d)))
            .collect()
    }
}
