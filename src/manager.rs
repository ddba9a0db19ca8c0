//! # Resource Manager
//!
//! Runs a [`QueryPlan`] against the repositories of one session and fills
//! the [`ResourceContainer`]; on save, turns the container's changes back
//! into repository writes.
//!
//! ## Load
//! Entries run strictly in plan order. A chained entry's values are pulled
//! from the aggregates its source entry loaded, which are already in the
//! container. When `raise_on_not_found` is set:
//! - an exact id lookup fails if any requested id is missing;
//! - any other lookup with literal values fails if it finds nothing.
//!
//! Chained and windowed (limit/offset) lookups are never checked: coming
//! back short is a normal outcome for them.
//!
//! ## Save
//! Pre-save snapshot, diff, policy check against the plan's locks, then
//! writes in the registry's backward order.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::UnitOfWorkConfig;
use crate::container::{Difference, ResourceContainer};
use crate::error::{NotFoundError, Result, UnitOfWorkError};
use crate::lock_order::LockTotalOrderRegistry;
use crate::model::{AggregateType, EntityId};
use crate::persistence::RepositoryContainer;
use crate::query::{QueryPlan, ResolvedQuery, ResolvedTerm, ValueSource};

#[derive(Debug)]
pub struct ResourceManager {
    repositories: RepositoryContainer,
    registry: Arc<LockTotalOrderRegistry>,
    container: ResourceContainer,
    read_only: bool,
    raise_on_not_found: bool,
    plan: Option<QueryPlan>,
}

impl ResourceManager {
    pub fn new(repositories: RepositoryContainer, registry: Arc<LockTotalOrderRegistry>, read_only: bool) -> Self {
        Self {
            repositories,
            registry,
            container: ResourceContainer::new(),
            read_only,
            raise_on_not_found: true,
            plan: None,
        }
    }

    /// A manager whose mode is `read_only` and whose not-found policy comes
    /// from `config`.
    pub fn from_config(
        repositories: RepositoryContainer,
        registry: Arc<LockTotalOrderRegistry>,
        read_only: bool,
        config: &UnitOfWorkConfig,
    ) -> Self {
        Self::new(repositories, registry, read_only).with_raise_on_not_found(config.raise_on_not_found)
    }

    pub fn with_raise_on_not_found(mut self, raise: bool) -> Self {
        self.raise_on_not_found = raise;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn raise_on_not_found(&self) -> bool {
        self.raise_on_not_found
    }

    pub fn container(&self) -> &ResourceContainer {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut ResourceContainer {
        &mut self.container
    }

    pub fn repositories(&self) -> &RepositoryContainer {
        &self.repositories
    }

    pub fn registry(&self) -> &LockTotalOrderRegistry {
        &self.registry
    }

    /// The plan loaded last, with every entry's result recorded.
    pub fn plan(&self) -> Option<&QueryPlan> {
        self.plan.as_ref()
    }

    /// Executes every entry of `plan` and keeps the plan as the active one.
    ///
    /// # Errors
    /// - [`NotFoundError`] per the not-found policy above.
    /// - [`UnitOfWorkError::ReadOnlyMismatch`] once all entries loaded, if
    ///   the plan's intent disagrees with this manager's mode.
    /// - Whatever the repositories report, concurrency errors included.
    #[instrument(skip(self, plan), fields(entries = plan.len(), mutating = plan.is_mutating()))]
    pub async fn load(&mut self, mut plan: QueryPlan) -> Result<()> {
        for index in 0..plan.len() {
            if plan.entries()[index].is_loaded() {
                return Err(UnitOfWorkError::AlreadyLoaded(index).into());
            }
            let query = self.resolve(&plan, index)?;

            let loaded = if query.is_unsatisfiable() {
                debug!(index, aggregate_type = %query.model_type, "nothing to look up");
                Vec::new()
            } else {
                self.repositories.load(&query).await?
            };
            let ids: Vec<EntityId> = loaded.iter().map(|a| a.entity_id()).collect();
            self.container.put_many(query.model_type, loaded)?;
            self.check_not_found(&query, &ids)?;

            debug!(index, aggregate_type = %query.model_type, count = ids.len(), "entry loaded");
            if let Some(entry) = plan.entries_mut().get_mut(index) {
                entry.mark_loaded(ids);
            }
        }

        if self.read_only == plan.is_mutating() {
            return Err(UnitOfWorkError::ReadOnlyMismatch {
                manager_read_only: self.read_only,
                plan_mutating: plan.is_mutating(),
            }
            .into());
        }

        self.plan = Some(plan);
        Ok(())
    }

    /// Replaces chained sources of entry `index` with concrete values.
    fn resolve(&self, plan: &QueryPlan, index: usize) -> Result<ResolvedQuery> {
        let entry = &plan.entries()[index];
        let mut terms = Vec::with_capacity(entry.criteria().terms().len());

        for criterion in entry.criteria().terms() {
            let (values, chained) = match &criterion.source {
                ValueSource::Values(values) => (values.clone(), false),
                ValueSource::Previous { index: source, extractor } => {
                    let source_entry = plan
                        .entries()
                        .get(*source)
                        .ok_or(UnitOfWorkError::NotLoaded(*source))?;
                    let ids = source_entry
                        .result()
                        .ok_or(UnitOfWorkError::NotLoaded(*source))?;

                    let mut values = Vec::new();
                    for aggregate in self.container.get_by_ids(source_entry.model_type(), ids) {
                        for value in extractor.extract(aggregate) {
                            if !values.contains(&value) {
                                values.push(value);
                            }
                        }
                    }
                    (values, true)
                }
            };
            terms.push(ResolvedTerm {
                attribute: criterion.attribute.clone(),
                operator: criterion.operator,
                values,
                chained,
            });
        }

        Ok(ResolvedQuery {
            model_type: entry.model_type(),
            terms,
            combinator: entry.criteria().combinator(),
            lock_mode: entry.lock_mode(),
            order_by: entry.order_by().cloned(),
            limit: entry.limit(),
            offset: entry.offset(),
        })
    }

    fn check_not_found(&self, query: &ResolvedQuery, loaded: &[EntityId]) -> Result<(), NotFoundError> {
        if !self.raise_on_not_found
            || !query.is_literal()
            || query.limit.is_some()
            || query.offset.is_some()
        {
            return Ok(());
        }
        if query.is_exact_id_lookup() {
            let missing: Vec<EntityId> = query
                .requested_ids()
                .into_iter()
                .filter(|id| !loaded.contains(id))
                .collect();
            if !missing.is_empty() {
                return Err(NotFoundError::new(query.model_type, missing));
            }
        } else if loaded.is_empty() {
            return Err(NotFoundError::new(query.model_type, Vec::new()));
        }
        Ok(())
    }

    /// Records the baseline the next save diffs against.
    pub fn take_baseline(&mut self) -> Result<()> {
        Ok(self.container.take_snapshot()?)
    }

    /// Writes everything that changed since the baseline.
    ///
    /// Returns the change set as written, dependents first.
    ///
    /// # Errors
    /// [`UnitOfWorkError::PolicyViolation`] if a change is not covered by
    /// the active plan's locks; repository errors otherwise.
    #[instrument(skip(self), fields(read_only = self.read_only))]
    pub async fn save(&mut self) -> Result<Vec<(AggregateType, Difference)>> {
        self.container.take_snapshot()?;
        let changes = self.container.get_resource_changes()?;

        match &self.plan {
            Some(plan) => plan.validate_changes(&changes)?,
            None => QueryPlan::empty(!self.read_only).validate_changes(&changes)?,
        }

        let ordered = changes.into_ordered(&self.registry);
        self.repositories.save(&ordered).await?;
        info!(types = ordered.len(), "changes saved");
        Ok(ordered)
    }

    /// A fresh id for a new aggregate of `aggregate_type`.
    pub fn generate_id(&self, aggregate_type: AggregateType) -> Result<EntityId> {
        self.repositories.unique_id(aggregate_type)
    }
}
