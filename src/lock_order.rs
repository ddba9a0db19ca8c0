//! # Lock Total Order
//!
//! A fixed ranking of aggregate types. Any transaction that locks more than
//! one type must lock them in ascending priority, so no two transactions can
//! ever wait on each other in opposite order.
//!
//! The registry itself locks nothing. It is consulted in two places:
//! - [`QueryPlanBuilder::build`](crate::query::QueryPlanBuilder::build)
//!   rejects mutating plans whose entries are not strictly ascending.
//! - [`ResourceManager::save`](crate::manager::ResourceManager::save) writes
//!   changes in [`backward`](LockTotalOrderRegistry::backward) order,
//!   dependents first.
//!
//! The table is built once at start-up and shared by reference (usually in
//! an `Arc`); it is never mutated afterwards.

use std::collections::BTreeMap;

use crate::error::{ValidationError, ValidationErrorKind};
use crate::model::AggregateType;

/// Immutable aggregate type → priority table. Lower priority locks first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTotalOrderRegistry {
    priorities: BTreeMap<AggregateType, u32>,
    /// All types sorted by ascending priority.
    order: Vec<AggregateType>,
}

impl LockTotalOrderRegistry {
    /// Builds a registry from an explicit table.
    ///
    /// # Errors
    /// The table must cover every [`AggregateType`] and must not assign one
    /// priority to two types. Gaps between priorities are fine.
    pub fn new(table: &[(AggregateType, u32)]) -> Result<Self, ValidationError> {
        let mut priorities = BTreeMap::new();
        let mut owners: BTreeMap<u32, AggregateType> = BTreeMap::new();

        for &(aggregate_type, priority) in table {
            if let Some(&first) = owners.get(&priority) {
                if first != aggregate_type {
                    return Err(ValidationError::new(ValidationErrorKind::PriorityTie {
                        priority,
                        first,
                        second: aggregate_type,
                    }));
                }
            }
            if let Some(previous) = priorities.insert(aggregate_type, priority) {
                owners.remove(&previous);
            }
            owners.insert(priority, aggregate_type);
        }

        if let Some(&missing) = AggregateType::ALL
            .iter()
            .find(|t| !priorities.contains_key(t))
        {
            return Err(ValidationError::new(ValidationErrorKind::MissingPriority(
                missing,
            )));
        }

        let order = owners.into_values().collect();
        Ok(Self { priorities, order })
    }

    /// The shop's dependency order: customers, then their purchases, then
    /// the products those purchases reference.
    pub fn standard() -> Self {
        let priorities: BTreeMap<AggregateType, u32> = AggregateType::ALL
            .iter()
            .map(|&t| (t, Self::standard_priority(t)))
            .collect();
        let mut order: Vec<AggregateType> = AggregateType::ALL.to_vec();
        order.sort_by_key(|t| priorities[t]);
        Self { priorities, order }
    }

    fn standard_priority(aggregate_type: AggregateType) -> u32 {
        match aggregate_type {
            AggregateType::Customer => 0,
            AggregateType::PurchaseActive => 2,
            AggregateType::Product => 7,
        }
    }

    pub fn priority(&self, aggregate_type: AggregateType) -> u32 {
        // Construction guarantees every type is present.
        self.priorities
            .get(&aggregate_type)
            .copied()
            .unwrap_or(u32::MAX)
    }

    /// Types from independent to dependent. Use for loading and locking.
    pub fn forward(&self) -> impl Iterator<Item = AggregateType> + '_ {
        self.order.iter().copied()
    }

    /// Types from dependent to independent. Use for saving and deleting.
    pub fn backward(&self) -> impl Iterator<Item = AggregateType> + '_ {
        self.order.iter().rev().copied()
    }

    /// Sorts `types` into lock-acquisition order, dropping duplicates.
    pub fn sort(&self, types: &[AggregateType]) -> Vec<AggregateType> {
        let mut sorted = types.to_vec();
        sorted.sort_by_key(|&t| self.priority(t));
        sorted.dedup();
        sorted
    }

    /// True if `types` is strictly ascending in priority.
    pub fn is_ascending(&self, types: &[AggregateType]) -> bool {
        types
            .windows(2)
            .all(|pair| self.priority(pair[0]) < self.priority(pair[1]))
    }
}

impl Default for LockTotalOrderRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
