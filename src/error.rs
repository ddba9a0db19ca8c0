//! # Errors
//!
//! One enum per failure family, plus the umbrella [`ResourceError`] that the
//! unit of work surfaces to use cases.
//!
//! | Family | Raised by | Retry? |
//! |---|---|---|
//! | [`ValidationError`] | `QueryPlanBuilder::build`, registry construction | no, fix the plan |
//! | [`NotFoundError`] | strict id loads, container lookups | no |
//! | [`UnitOfWorkError`] | lifecycle misuse, policy violations | no, programming error |
//! | [`ConcurrencyError`] | persistence adapter lock signals | yes, in a fresh unit of work |
//!
//! Nothing here is retried automatically.

use thiserror::Error;

use crate::model::{AggregateType, EntityId};

/// Why a query plan (or a registry table) was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationErrorKind {
    #[error("no load() started before configuring a query")]
    NoEntry,
    #[error("query has no criteria and no previous source")]
    EmptyCriteria,
    #[error("criteria end with a dangling combinator")]
    Unterminated,
    #[error("two combinators in a row")]
    DoubleCombinator,
    #[error("criteria start with a combinator")]
    LeadingCombinator,
    #[error("two criteria terms without a combinator between them")]
    MissingCombinator,
    #[error("AND and OR mixed in one criteria chain")]
    MixedCombinators,
    #[error("previous source {index} does not precede entry")]
    ForwardReference { index: usize },
    #[error("no previous query to chain from")]
    NoPreviousEntry,
    #[error("no reference from {source_type} to {target}")]
    NoReference {
        source_type: AggregateType,
        target: AggregateType,
    },
    #[error("lock mode not specified for a mutating plan")]
    LockNotSpecified,
    #[error("{0} is not allowed in a read-only plan")]
    LockInReadOnlyPlan(&'static str),
    #[error("NO_LOCK is not allowed in a mutating plan")]
    NoLockInMutatingPlan,
    #[error("more than one query for {0} in a mutating plan")]
    DuplicateType(AggregateType),
    #[error("lock order violation: {previous} must not precede {current}")]
    LockOrderViolation {
        previous: AggregateType,
        current: AggregateType,
    },
    #[error("limit must be positive")]
    ZeroLimit,
    #[error("priority table has no entry for {0}")]
    MissingPriority(AggregateType),
    #[error("priority {priority} assigned to both {first} and {second}")]
    PriorityTie {
        priority: u32,
        first: AggregateType,
        second: AggregateType,
    },
}

/// A malformed query plan, caught before any transaction begins.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}{kind}", .entry.map(|i| format!("query entry {i}: ")).unwrap_or_default())]
pub struct ValidationError {
    /// Index of the first offending plan entry, when the error is tied to one.
    pub entry: Option<usize>,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind) -> Self {
        Self { entry: None, kind }
    }

    pub fn at(entry: usize, kind: ValidationErrorKind) -> Self {
        Self {
            entry: Some(entry),
            kind,
        }
    }
}

/// Requested aggregates were absent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{aggregate_type} not found: {}", format_ids(.ids))]
pub struct NotFoundError {
    pub aggregate_type: AggregateType,
    pub ids: Vec<EntityId>,
}

impl NotFoundError {
    pub fn new(aggregate_type: AggregateType, ids: Vec<EntityId>) -> Self {
        Self {
            aggregate_type,
            ids,
        }
    }
}

fn format_ids(ids: &[EntityId]) -> String {
    if ids.is_empty() {
        return "no match".to_string();
    }
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Misuse of the transaction lifecycle or a broken change policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnitOfWorkError {
    #[error("unit of work is exhausted")]
    Exhausted,
    #[error("unit of work has not been entered")]
    NotEntered,
    #[error("unit of work is already active")]
    AlreadyEntered,
    #[error("cannot commit a read-only unit of work")]
    CommitOnReadOnly,
    #[error("query plan read-only state does not match the resource manager (manager read_only={manager_read_only}, plan mutating={plan_mutating})")]
    ReadOnlyMismatch {
        manager_read_only: bool,
        plan_mutating: bool,
    },
    #[error("change policy violated for {aggregate_type}: {reason}")]
    PolicyViolation {
        aggregate_type: AggregateType,
        reason: &'static str,
    },
    #[error("cannot put {actual} into the {expected} partition")]
    TypeMismatch {
        expected: AggregateType,
        actual: AggregateType,
    },
    #[error("baseline snapshot has not been taken")]
    SnapshotMissing,
    #[error("baseline and pre-save snapshots are already taken")]
    SnapshotsExhausted,
    #[error("query entry {0} is already loaded")]
    AlreadyLoaded(usize),
    #[error("query entry {0} is not loaded")]
    NotLoaded(usize),
    #[error("no repository registered for {0}")]
    MissingRepository(AggregateType),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for UnitOfWorkError {
    fn from(e: serde_json::Error) -> Self {
        UnitOfWorkError::Serialization(e.to_string())
    }
}

/// Lock contention signalled by the persistence adapter.
///
/// These are the only failures a caller is expected to retry, by entering a
/// fresh unit of work.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ConcurrencyError {
    #[error("deadlock detected")]
    DeadlockDetected,
    #[error("lock wait timeout exceeded")]
    LockTimeout,
    #[error("NOWAIT lock could not be acquired immediately")]
    NoWaitViolated,
}

impl ConcurrencyError {
    /// Translates a MySQL/InnoDB server error code.
    pub fn from_mysql_code(code: u16) -> Option<Self> {
        match code {
            1213 => Some(ConcurrencyError::DeadlockDetected),
            1205 => Some(ConcurrencyError::LockTimeout),
            3572 => Some(ConcurrencyError::NoWaitViolated),
            _ => None,
        }
    }
}

/// Failure reported by a repository or transaction backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Everything a unit of work can fail with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),
    #[error("storage backend error: {0}")]
    Store(String),
}

impl From<StoreError> for ResourceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Concurrency(c) => ResourceError::Concurrency(c),
            StoreError::Backend(msg) => ResourceError::Store(msg),
        }
    }
}

impl ResourceError {
    /// True when re-running the use case in a fresh unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResourceError::Concurrency(_))
    }
}

pub type Result<T, E = ResourceError> = std::result::Result<T, E>;
