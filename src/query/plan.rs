//! The built, immutable query plan and its per-entry load state.

use tracing::debug;

use super::criteria::QueryCriteria;
use crate::container::ResourceChanges;
use crate::error::UnitOfWorkError;
use crate::model::{AggregateType, EntityId};

/// Row lock the persistence adapter is asked to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    NoLock,
    Shared,
    SharedNowait,
    Exclusive,
    ExclusiveNowait,
}

impl LockMode {
    pub fn is_locking(&self) -> bool {
        !matches!(self, LockMode::NoLock)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, LockMode::Exclusive | LockMode::ExclusiveNowait)
    }

    /// NOWAIT modes fail immediately instead of blocking on a held lock.
    pub fn is_nowait(&self) -> bool {
        matches!(self, LockMode::SharedNowait | LockMode::ExclusiveNowait)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LockMode::NoLock => "NO_LOCK",
            LockMode::Shared => "SHARED",
            LockMode::SharedNowait => "SHARED_NOWAIT",
            LockMode::Exclusive => "EXCLUSIVE",
            LockMode::ExclusiveNowait => "EXCLUSIVE_NOWAIT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub attribute: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum LoadState {
    Pending,
    Loaded(Vec<EntityId>),
}

/// One load of one aggregate type.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlanEntry {
    model_type: AggregateType,
    criteria: QueryCriteria,
    lock_mode: LockMode,
    order_by: Option<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
    source_index: Option<usize>,
    state: LoadState,
}

impl QueryPlanEntry {
    pub(crate) fn new(
        model_type: AggregateType,
        criteria: QueryCriteria,
        lock_mode: LockMode,
        order_by: Option<OrderBy>,
        limit: Option<usize>,
        offset: Option<usize>,
        source_index: Option<usize>,
    ) -> Self {
        Self {
            model_type,
            criteria,
            lock_mode,
            order_by,
            limit,
            offset,
            source_index,
            state: LoadState::Pending,
        }
    }

    pub fn model_type(&self) -> AggregateType {
        self.model_type
    }

    pub fn criteria(&self) -> &QueryCriteria {
        &self.criteria
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    pub fn order_by(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Earliest entry whose result feeds this one, if the entry is chained.
    pub fn source_index(&self) -> Option<usize> {
        self.source_index
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, LoadState::Loaded(_))
    }

    /// Ids loaded by this entry, in the order the adapter returned them.
    pub fn result(&self) -> Option<&[EntityId]> {
        match &self.state {
            LoadState::Loaded(ids) => Some(ids),
            LoadState::Pending => None,
        }
    }

    /// Records the load result. An entry is consumed exactly once.
    pub(crate) fn mark_loaded(&mut self, ids: Vec<EntityId>) -> bool {
        if self.is_loaded() {
            return false;
        }
        self.state = LoadState::Loaded(ids);
        true
    }
}

/// Ordered load entries plus the plan's write intent.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    entries: Vec<QueryPlanEntry>,
    mutating: bool,
}

impl QueryPlan {
    pub(crate) fn new(entries: Vec<QueryPlanEntry>, mutating: bool) -> Self {
        Self { entries, mutating }
    }

    /// A plan that loads nothing. Used when a unit of work is entered
    /// without a plan, so the change policy still has something to check
    /// against.
    pub fn empty(mutating: bool) -> Self {
        Self::new(Vec::new(), mutating)
    }

    pub fn entries(&self) -> &[QueryPlanEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [QueryPlanEntry] {
        &mut self.entries
    }

    pub fn is_mutating(&self) -> bool {
        self.mutating
    }

    pub fn is_read_only(&self) -> bool {
        !self.mutating
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_for(&self, aggregate_type: AggregateType) -> Option<&QueryPlanEntry> {
        self.entries.iter().find(|e| e.model_type == aggregate_type)
    }

    /// Checks a change set against the locks this plan declared.
    ///
    /// A read-only plan admits no change at all. A mutating plan admits
    /// creations of any type; updates and deletions of a type need an entry
    /// for that type holding an exclusive lock.
    ///
    /// # Errors
    /// [`UnitOfWorkError::PolicyViolation`] for the first offending type.
    pub fn validate_changes(&self, changes: &ResourceChanges) -> Result<(), UnitOfWorkError> {
        for (aggregate_type, difference) in changes.iter() {
            if difference.is_empty() {
                continue;
            }
            if !self.mutating {
                return Err(UnitOfWorkError::PolicyViolation {
                    aggregate_type,
                    reason: "read-only plan cannot change aggregates",
                });
            }
            if difference.updated.is_empty() && difference.deleted.is_empty() {
                continue;
            }
            match self.entry_for(aggregate_type) {
                None => {
                    return Err(UnitOfWorkError::PolicyViolation {
                        aggregate_type,
                        reason: "updated or deleted without a locking query",
                    })
                }
                Some(entry) if !entry.lock_mode.is_exclusive() => {
                    return Err(UnitOfWorkError::PolicyViolation {
                        aggregate_type,
                        reason: "updated or deleted under a shared lock",
                    })
                }
                Some(_) => {}
            }
        }

        for entry in &self.entries {
            let changed = changes
                .get(entry.model_type)
                .is_some_and(|d| !d.is_empty());
            if entry.lock_mode.is_exclusive() && !changed {
                debug!(
                    aggregate_type = %entry.model_type,
                    "exclusive lock held without changes"
                );
            }
        }
        Ok(())
    }
}
