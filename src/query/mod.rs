//! # Query Plans
//!
//! What a unit of work loads, described up front:
//!
//! - [`QueryPlanBuilder`] records `load(type)` entries with criteria, lock
//!   mode, ordering and a limit/offset window.
//! - [`QueryPlan`] is the validated, immutable result. Its entries run in
//!   builder order; an entry may be chained onto an earlier one so that the
//!   ids loaded there feed its criteria.
//! - [`ResolvedQuery`] is an entry with its chained values filled in, which
//!   is the form handed to repositories.

pub mod builder;
pub mod criteria;
pub mod plan;
pub mod resolved;

pub use builder::QueryPlanBuilder;
pub use criteria::{
    Combinator, CriteriaToken, Criterion, CriterionOperator, ExtractFn, QueryCriteria,
    ValueExtractor, ValueSource,
};
pub use plan::{LockMode, OrderBy, QueryPlan, QueryPlanEntry};
pub use resolved::{ResolvedQuery, ResolvedTerm};
