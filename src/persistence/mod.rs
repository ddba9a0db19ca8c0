//! # Persistence Contract
//!
//! The narrow seam between the unit of work and physical storage.
//!
//! - [`Repository`]: one per aggregate type. Fetches by resolved criteria
//!   and writes one type's [`Difference`].
//! - [`TransactionControl`]: begin/commit/rollback of the physical
//!   transaction behind a session.
//! - [`RepositoryContainer`]: one session's repositories for every type,
//!   plus its transaction control. Built once per unit of work.
//! - [`SessionProvider`]: opens a fresh `RepositoryContainer`, used by
//!   [`UnitOfWorkFactory`](crate::unit_of_work::UnitOfWorkFactory).
//!
//! Lock contention must be reported as [`StoreError::Concurrency`] so that
//! callers can tell retryable failures apart.
//!
//! [`memory`] holds an in-process implementation.

pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::container::Difference;
use crate::error::{StoreError, UnitOfWorkError};
use crate::model::{Aggregate, AggregateType, EntityId};
use crate::query::ResolvedQuery;

/// Storage access for one aggregate type.
#[async_trait]
pub trait Repository: Send + Sync {
    fn aggregate_type(&self) -> AggregateType;

    /// Aggregates matching `query`, taking the lock it names.
    async fn get_by_attribute(&self, query: &ResolvedQuery) -> Result<Vec<Aggregate>, StoreError>;

    /// Writes created, updated and deleted rows of this repository's type.
    async fn save_difference(&self, difference: &Difference) -> Result<(), StoreError>;

    /// A fresh id for a new aggregate of this type.
    fn unique_id(&self) -> EntityId {
        EntityId::new()
    }
}

/// Physical transaction of one session.
#[async_trait]
pub trait TransactionControl: Send + Sync {
    async fn begin(&self) -> Result<(), StoreError>;
    async fn commit(&self) -> Result<(), StoreError>;
    async fn rollback(&self) -> Result<(), StoreError>;
}

/// Opens sessions for new units of work.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Opens a session whose blocking lock waits give up after
    /// `wait_timeout`.
    async fn open_session(&self, wait_timeout: Duration) -> Result<RepositoryContainer, StoreError>;
}

/// Every repository of one session, keyed by type.
pub struct RepositoryContainer {
    repositories: BTreeMap<AggregateType, Arc<dyn Repository>>,
    transaction: Arc<dyn TransactionControl>,
}

impl std::fmt::Debug for RepositoryContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryContainer")
            .field("types", &self.repositories.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Collects repositories until every aggregate type has one.
pub struct RepositoryContainerBuilder {
    repositories: BTreeMap<AggregateType, Arc<dyn Repository>>,
    transaction: Arc<dyn TransactionControl>,
}

impl RepositoryContainerBuilder {
    /// Registers `repository` under its own type, replacing any earlier one.
    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repositories.insert(repository.aggregate_type(), repository);
        self
    }

    /// # Errors
    /// [`UnitOfWorkError::MissingRepository`] for the first uncovered type.
    pub fn build(self) -> Result<RepositoryContainer, UnitOfWorkError> {
        if let Some(&missing) = AggregateType::ALL
            .iter()
            .find(|t| !self.repositories.contains_key(t))
        {
            return Err(UnitOfWorkError::MissingRepository(missing));
        }
        Ok(RepositoryContainer {
            repositories: self.repositories,
            transaction: self.transaction,
        })
    }
}

impl RepositoryContainer {
    pub fn builder(transaction: Arc<dyn TransactionControl>) -> RepositoryContainerBuilder {
        RepositoryContainerBuilder {
            repositories: BTreeMap::new(),
            transaction,
        }
    }

    fn repository(&self, aggregate_type: AggregateType) -> Result<&Arc<dyn Repository>, UnitOfWorkError> {
        self.repositories
            .get(&aggregate_type)
            .ok_or(UnitOfWorkError::MissingRepository(aggregate_type))
    }

    #[instrument(skip(self, query), fields(aggregate_type = %query.model_type, lock = query.lock_mode.name()))]
    pub async fn load(&self, query: &ResolvedQuery) -> crate::error::Result<Vec<Aggregate>> {
        let loaded = self
            .repository(query.model_type)?
            .get_by_attribute(query)
            .await?;
        debug!(count = loaded.len(), "loaded");
        Ok(loaded)
    }

    /// Writes each type's difference in the order given.
    #[instrument(skip(self, changes), fields(types = changes.len()))]
    pub async fn save(&self, changes: &[(AggregateType, Difference)]) -> crate::error::Result<()> {
        for (aggregate_type, difference) in changes {
            self.repository(*aggregate_type)?
                .save_difference(difference)
                .await?;
            debug!(
                aggregate_type = %aggregate_type,
                created = difference.created.len(),
                updated = difference.updated.len(),
                deleted = difference.deleted.len(),
                "saved"
            );
        }
        Ok(())
    }

    pub fn unique_id(&self, aggregate_type: AggregateType) -> crate::error::Result<EntityId> {
        Ok(self.repository(aggregate_type)?.unique_id())
    }

    /// Handle on the session's transaction, for rolling back after the
    /// owning unit of work is gone.
    pub fn transaction(&self) -> Arc<dyn TransactionControl> {
        Arc::clone(&self.transaction)
    }

    pub async fn begin(&self) -> Result<(), StoreError> {
        self.transaction.begin().await
    }

    pub async fn commit(&self) -> Result<(), StoreError> {
        self.transaction.commit().await
    }

    pub async fn rollback(&self) -> Result<(), StoreError> {
        self.transaction.rollback().await
    }
}
