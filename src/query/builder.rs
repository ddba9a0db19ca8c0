//! Fluent construction of a [`QueryPlan`].
//!
//! Calls are recorded as-is; every check runs in [`QueryPlanBuilder::build`],
//! which reports the first offending entry. A builder is consumed by
//! `build()`, so a plan is never half-built.

use serde_json::Value;

use super::criteria::{Combinator, CriteriaToken, Criterion, ExtractFn, QueryCriteria, ValueExtractor};
use super::plan::{LockMode, OrderBy, QueryPlan, QueryPlanEntry};
use crate::error::{ValidationError, ValidationErrorKind};
use crate::lock_order::LockTotalOrderRegistry;
use crate::model::{AggregateType, EntityId};
use crate::reference;

#[derive(Debug)]
struct EntryDraft {
    model_type: AggregateType,
    tokens: Vec<CriteriaToken>,
    lock_mode: Option<LockMode>,
    order_by: Option<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
    source_index: Option<usize>,
}

impl EntryDraft {
    fn new(model_type: AggregateType) -> Self {
        Self {
            model_type,
            tokens: Vec::new(),
            lock_mode: None,
            order_by: None,
            limit: None,
            offset: None,
            source_index: None,
        }
    }
}

/// Accumulates load entries for one unit of work.
///
/// ```rust
/// use shop_uow::lock_order::LockTotalOrderRegistry;
/// use shop_uow::model::{AggregateType, EntityId};
/// use shop_uow::query::{LockMode, QueryPlanBuilder};
///
/// let registry = LockTotalOrderRegistry::standard();
/// let plan = QueryPlanBuilder::mutating(&registry)
///     .load(AggregateType::Product)
///     .from_id([EntityId::new()])
///     .for_update()
///     .build()
///     .unwrap();
/// assert!(plan.is_mutating());
/// assert_eq!(plan.entries()[0].lock_mode(), LockMode::Exclusive);
/// ```
#[derive(Debug)]
pub struct QueryPlanBuilder<'r> {
    registry: &'r LockTotalOrderRegistry,
    mutating: bool,
    entries: Vec<EntryDraft>,
    error: Option<ValidationError>,
}

impl<'r> QueryPlanBuilder<'r> {
    pub fn new(registry: &'r LockTotalOrderRegistry, mutating: bool) -> Self {
        Self {
            registry,
            mutating,
            entries: Vec::new(),
            error: None,
        }
    }

    /// A plan for a read-only unit of work. Entries default to NO_LOCK.
    pub fn read_only(registry: &'r LockTotalOrderRegistry) -> Self {
        Self::new(registry, false)
    }

    /// A plan with write intent. Every entry must choose a lock.
    pub fn mutating(registry: &'r LockTotalOrderRegistry) -> Self {
        Self::new(registry, true)
    }

    /// Starts a new entry. Everything until the next `load` configures it.
    pub fn load(mut self, model_type: AggregateType) -> Self {
        self.entries.push(EntryDraft::new(model_type));
        self
    }

    fn fail(&mut self, error: ValidationError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Applies `f` to the current entry, recording its error (or
    /// [`ValidationErrorKind::NoEntry`]) for `build()` to report.
    fn with_current<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&[EntryDraft], &mut EntryDraft, usize) -> Result<(), ValidationErrorKind>,
    {
        let Some((current, earlier)) = self.entries.split_last_mut() else {
            self.fail(ValidationError::new(ValidationErrorKind::NoEntry));
            return self;
        };
        let index = earlier.len();
        if let Err(kind) = f(&*earlier, current, index) {
            self.fail(ValidationError::at(index, kind));
        }
        self
    }

    fn push_term(self, criterion: Criterion) -> Self {
        self.with_current(|_, entry, _| {
            if let Some(source) = criterion.previous_index() {
                entry.source_index = Some(entry.source_index.map_or(source, |s| s.min(source)));
            }
            entry.tokens.push(CriteriaToken::Term(criterion));
            Ok(())
        })
    }

    fn push_combinator(self, combinator: Combinator) -> Self {
        self.with_current(|_, entry, _| {
            entry.tokens.push(CriteriaToken::Combinator(combinator));
            Ok(())
        })
    }

    pub fn and_(self) -> Self {
        self.push_combinator(Combinator::And)
    }

    pub fn or_(self) -> Self {
        self.push_combinator(Combinator::Or)
    }

    /// Matches aggregates whose `name` attribute is one of `values`.
    pub fn from_attribute<I, V>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_term(Criterion::values(name, values))
    }

    /// Shorthand for `from_attribute("entity_id", ids)`.
    pub fn from_id<I>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = EntityId>,
    {
        self.from_attribute("entity_id", ids)
    }

    /// Matches aggregates whose `name` attribute equals `value`.
    pub fn where_equals(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push_term(Criterion::equals(name, value.into()))
    }

    /// Chains this entry onto an earlier one: `extract` maps each aggregate
    /// loaded by entry `index` (default: the preceding entry) to values of
    /// `attribute`.
    pub fn from_previous(
        self,
        index: Option<usize>,
        attribute: impl Into<String>,
        extract: ExtractFn,
    ) -> Self {
        let attribute = attribute.into();
        let mut resolved = None;
        let this = self.with_current(|_, _, current| {
            resolved = Some(resolve_source(index, current)?);
            Ok(())
        });
        match resolved {
            Some(source) => {
                this.push_term(Criterion::previous(attribute, source, ValueExtractor::new(extract)))
            }
            None => this,
        }
    }

    /// Like [`from_previous`](Self::from_previous), with the attribute and
    /// extraction taken from the domain reference table.
    pub fn from_reference(self, index: Option<usize>) -> Self {
        let mut resolved = None;
        let this = self.with_current(|earlier, entry, current| {
            let source = resolve_source(index, current)?;
            let source_type = earlier[source].model_type;
            let descriptor = reference::reference(source_type, entry.model_type).ok_or(
                ValidationErrorKind::NoReference {
                    source_type,
                    target: entry.model_type,
                },
            )?;
            resolved = Some((source, descriptor));
            Ok(())
        });
        match resolved {
            Some((source, descriptor)) => this.push_term(Criterion::previous(
                descriptor.attribute,
                source,
                descriptor.extractor,
            )),
            None => this,
        }
    }

    pub fn order_by(self, attribute: impl Into<String>, descending: bool) -> Self {
        let attribute = attribute.into();
        self.with_current(|_, entry, _| {
            entry.order_by = Some(OrderBy {
                attribute,
                descending,
            });
            Ok(())
        })
    }

    pub fn limit(self, limit: usize) -> Self {
        self.with_current(|_, entry, _| {
            entry.limit = Some(limit);
            Ok(())
        })
    }

    pub fn offset(self, offset: usize) -> Self {
        self.with_current(|_, entry, _| {
            entry.offset = Some(offset);
            Ok(())
        })
    }

    fn lock(self, mode: LockMode) -> Self {
        self.with_current(|_, entry, _| {
            entry.lock_mode = Some(mode);
            Ok(())
        })
    }

    pub fn no_lock(self) -> Self {
        self.lock(LockMode::NoLock)
    }

    pub fn for_share(self) -> Self {
        self.lock(LockMode::Shared)
    }

    pub fn for_share_nowait(self) -> Self {
        self.lock(LockMode::SharedNowait)
    }

    pub fn for_update(self) -> Self {
        self.lock(LockMode::Exclusive)
    }

    pub fn for_update_nowait(self) -> Self {
        self.lock(LockMode::ExclusiveNowait)
    }

    /// Validates every entry and freezes the plan.
    ///
    /// # Errors
    /// The first recorded or detected [`ValidationError`], tagged with the
    /// offending entry's index.
    pub fn build(self) -> Result<QueryPlan, ValidationError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut entries: Vec<QueryPlanEntry> = Vec::with_capacity(self.entries.len());
        for (index, draft) in self.entries.into_iter().enumerate() {
            let at = |kind| ValidationError::at(index, kind);

            let criteria = QueryCriteria::parse(draft.tokens).map_err(at)?;
            if criteria.sources().any(|source| source >= index) {
                let source = criteria.sources().max().unwrap_or(index);
                return Err(at(ValidationErrorKind::ForwardReference { index: source }));
            }
            if draft.limit == Some(0) {
                return Err(at(ValidationErrorKind::ZeroLimit));
            }

            let lock_mode = match (self.mutating, draft.lock_mode) {
                (false, None | Some(LockMode::NoLock)) => LockMode::NoLock,
                (false, Some(mode)) => {
                    return Err(at(ValidationErrorKind::LockInReadOnlyPlan(mode.name())))
                }
                (true, None) => return Err(at(ValidationErrorKind::LockNotSpecified)),
                (true, Some(LockMode::NoLock)) => {
                    return Err(at(ValidationErrorKind::NoLockInMutatingPlan))
                }
                (true, Some(mode)) => mode,
            };

            if self.mutating {
                if entries.iter().any(|e| e.model_type() == draft.model_type) {
                    return Err(at(ValidationErrorKind::DuplicateType(draft.model_type)));
                }
                if let Some(previous) = entries.last() {
                    let previous = previous.model_type();
                    if !self.registry.is_ascending(&[previous, draft.model_type]) {
                        return Err(at(ValidationErrorKind::LockOrderViolation {
                            previous,
                            current: draft.model_type,
                        }));
                    }
                }
            }

            entries.push(QueryPlanEntry::new(
                draft.model_type,
                criteria,
                lock_mode,
                draft.order_by,
                draft.limit,
                draft.offset,
                draft.source_index,
            ));
        }

        Ok(QueryPlan::new(entries, self.mutating))
    }
}

fn resolve_source(index: Option<usize>, current: usize) -> Result<usize, ValidationErrorKind> {
    match index {
        Some(source) if source >= current => {
            Err(ValidationErrorKind::ForwardReference { index: source })
        }
        Some(source) => Ok(source),
        None => current
            .checked_sub(1)
            .ok_or(ValidationErrorKind::NoPreviousEntry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Aggregate, AggregateType::*};
    use crate::query::ValueSource;

    fn registry() -> LockTotalOrderRegistry {
        LockTotalOrderRegistry::standard()
    }

    fn customer_ids(aggregate: &Aggregate) -> Vec<Value> {
        vec![aggregate.entity_id().to_value()]
    }

    #[test]
    fn same_arguments_build_equal_plans() {
        let registry = registry();
        let (x, y) = (EntityId::new(), EntityId::new());
        let build = || {
            QueryPlanBuilder::read_only(&registry)
                .load(Product)
                .from_id([x, y])
                .build()
                .unwrap()
        };
        assert_eq!(build(), build());
        assert_eq!(build().entries()[0].criteria(), build().entries()[0].criteria());
    }

    #[test]
    fn entry_without_source_is_rejected() {
        let registry = registry();
        let err = QueryPlanBuilder::read_only(&registry)
            .load(Customer)
            .from_id([EntityId::new()])
            .load(Product)
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::at(1, ValidationErrorKind::EmptyCriteria));
    }

    #[test]
    fn configuring_before_load_is_rejected() {
        let registry = registry();
        let err = QueryPlanBuilder::read_only(&registry)
            .from_id([EntityId::new()])
            .load(Product)
            .from_id([EntityId::new()])
            .build()
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::NoEntry);
    }

    #[test]
    fn unterminated_chain_is_rejected() {
        let registry = registry();
        let err = QueryPlanBuilder::read_only(&registry)
            .load(Product)
            .from_attribute("sku", ["A"])
            .or_()
            .build()
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Unterminated);
    }

    #[test]
    fn last_lock_selector_wins() {
        let registry = registry();
        let plan = QueryPlanBuilder::mutating(&registry)
            .load(Product)
            .from_id([EntityId::new()])
            .for_share()
            .for_update_nowait()
            .build()
            .unwrap();
        assert_eq!(plan.entries()[0].lock_mode(), LockMode::ExclusiveNowait);
    }

    #[test]
    fn read_only_plan_admits_only_no_lock() {
        let registry = registry();
        let err = QueryPlanBuilder::read_only(&registry)
            .load(Product)
            .from_id([EntityId::new()])
            .for_share()
            .build()
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::LockInReadOnlyPlan("SHARED"));
    }

    #[test]
    fn mutating_plan_requires_a_lock() {
        let registry = registry();
        let err = QueryPlanBuilder::mutating(&registry)
            .load(Product)
            .from_id([EntityId::new()])
            .build()
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::LockNotSpecified);

        let err = QueryPlanBuilder::mutating(&registry)
            .load(Product)
            .from_id([EntityId::new()])
            .no_lock()
            .build()
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::NoLockInMutatingPlan);
    }

    #[test]
    fn mutating_plan_must_lock_in_ascending_order() {
        let registry = registry();
        let err = QueryPlanBuilder::mutating(&registry)
            .load(Product)
            .from_id([EntityId::new()])
            .for_update()
            .load(Customer)
            .from_id([EntityId::new()])
            .for_share()
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::at(
                1,
                ValidationErrorKind::LockOrderViolation {
                    previous: Product,
                    current: Customer,
                }
            )
        );

        let err = QueryPlanBuilder::mutating(&registry)
            .load(Product)
            .from_id([EntityId::new()])
            .for_update()
            .load(Product)
            .from_id([EntityId::new()])
            .for_update()
            .build()
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::DuplicateType(Product));
    }

    #[test]
    fn read_only_plan_may_repeat_types_in_any_order() {
        let registry = registry();
        let plan = QueryPlanBuilder::read_only(&registry)
            .load(Product)
            .from_attribute("sku", ["A"])
            .load(Customer)
            .from_id([EntityId::new()])
            .load(Product)
            .from_attribute("sku", ["B"])
            .build()
            .unwrap();
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn from_previous_defaults_to_preceding_entry() {
        let registry = registry();
        let plan = QueryPlanBuilder::read_only(&registry)
            .load(Customer)
            .from_id([EntityId::new()])
            .load(PurchaseActive)
            .from_previous(None, "customer_id", customer_ids)
            .build()
            .unwrap();

        let entry = &plan.entries()[1];
        assert_eq!(entry.source_index(), Some(0));
        assert!(matches!(
            entry.criteria().terms()[0].source,
            ValueSource::Previous { index: 0, .. }
        ));
    }

    #[test]
    fn from_previous_rejects_forward_and_missing_sources() {
        let registry = registry();
        let err = QueryPlanBuilder::read_only(&registry)
            .load(PurchaseActive)
            .from_previous(None, "customer_id", customer_ids)
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::at(0, ValidationErrorKind::NoPreviousEntry));

        let err = QueryPlanBuilder::read_only(&registry)
            .load(Customer)
            .from_id([EntityId::new()])
            .load(PurchaseActive)
            .from_previous(Some(1), "customer_id", customer_ids)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::at(1, ValidationErrorKind::ForwardReference { index: 1 })
        );
    }

    #[test]
    fn from_reference_requires_a_registered_pair() {
        let registry = registry();
        let err = QueryPlanBuilder::read_only(&registry)
            .load(Product)
            .from_id([EntityId::new()])
            .load(Customer)
            .from_reference(None)
            .build()
            .unwrap_err();
        assert_eq!(
            err.kind,
            ValidationErrorKind::NoReference {
                source_type: Product,
                target: Customer,
            }
        );
    }

    #[test]
    fn zero_limit_is_rejected() {
        let registry = registry();
        let err = QueryPlanBuilder::read_only(&registry)
            .load(Product)
            .from_attribute("sku", ["A"])
            .order_by("price", true)
            .limit(0)
            .build()
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::ZeroLimit);
    }
}
