//! # Unit of Work
//!
//! The transaction boundary. A unit of work owns one [`ResourceManager`]
//! (and so one container and one session) and moves through three states:
//!
//! ```text
//!  NotEntered ──enter()──▶ Active ──commit() / rollback() / close()──▶ Exhausted
//!       │                                                                 ▲
//!       └────────────────────────────close()──────────────────────────────┘
//! ```
//!
//! - `enter()` begins the physical transaction (skipped when read-only),
//!   loads the plan and takes the baseline snapshot.
//! - `commit()` saves and commits. Read-only units cannot commit.
//! - `rollback()` and `close()` roll back.
//! - A failure inside `enter()` or `commit()` rolls back and exhausts the
//!   unit before the error is returned.
//! - Every call on an exhausted unit fails with
//!   [`UnitOfWorkError::Exhausted`], except `close()`, which is idempotent.
//!
//! Dropping an active read-write unit rolls it back on the current tokio
//! runtime and logs a warning. Prefer an explicit `close().await`.
//!
//! Aggregates borrowed from [`UnitOfWork::get_resources`] cannot outlive the
//! borrow, so a use case cannot keep mutating them after commit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::UnitOfWorkConfig;
use crate::container::{Difference, ResourceContainer};
use crate::error::{ConcurrencyError, ResourceError, Result, UnitOfWorkError};
use crate::lock_order::LockTotalOrderRegistry;
use crate::manager::ResourceManager;
use crate::model::{AggregateType, EntityId};
use crate::persistence::SessionProvider;
use crate::query::QueryPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    NotEntered,
    Active,
    Exhausted,
}

/// Builds the error reported instead of a NOWAIT failure during load.
pub type NowaitErrorFn = Arc<dyn Fn() -> ResourceError + Send + Sync>;

pub struct UnitOfWork {
    manager: ResourceManager,
    plan: Option<QueryPlan>,
    state: UnitOfWorkState,
    on_nowait: Option<NowaitErrorFn>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("state", &self.state)
            .field("read_only", &self.manager.is_read_only())
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    pub fn new(manager: ResourceManager) -> Self {
        Self {
            manager,
            plan: None,
            state: UnitOfWorkState::NotEntered,
            on_nowait: None,
        }
    }

    /// Sets the plan `enter()` loads.
    pub fn with_plan(mut self, plan: QueryPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Replaces a [`ConcurrencyError::NoWaitViolated`] raised while loading
    /// with the error `on_nowait` builds.
    pub fn with_nowait_error(mut self, on_nowait: NowaitErrorFn) -> Self {
        self.on_nowait = Some(on_nowait);
        self
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.manager.is_read_only()
    }

    fn ensure_active(&self) -> Result<(), UnitOfWorkError> {
        match self.state {
            UnitOfWorkState::Active => Ok(()),
            UnitOfWorkState::NotEntered => Err(UnitOfWorkError::NotEntered),
            UnitOfWorkState::Exhausted => Err(UnitOfWorkError::Exhausted),
        }
    }

    /// Begins the transaction and loads the plan.
    #[instrument(skip(self), fields(read_only = self.manager.is_read_only()))]
    pub async fn enter(&mut self) -> Result<&mut ResourceContainer> {
        match self.state {
            UnitOfWorkState::NotEntered => {}
            UnitOfWorkState::Active => return Err(UnitOfWorkError::AlreadyEntered.into()),
            UnitOfWorkState::Exhausted => return Err(UnitOfWorkError::Exhausted.into()),
        }
        self.state = UnitOfWorkState::Active;

        if let Err(error) = self.start().await {
            warn!(%error, "enter failed");
            self.abort().await;
            return Err(self.translate_nowait(error));
        }

        info!("unit of work entered");
        Ok(self.manager.container_mut())
    }

    async fn start(&mut self) -> Result<()> {
        if !self.manager.is_read_only() {
            self.manager.repositories().begin().await?;
        }
        if let Some(plan) = self.plan.take() {
            self.manager.load(plan).await?;
        }
        self.manager.take_baseline()
    }

    fn translate_nowait(&self, error: ResourceError) -> ResourceError {
        match (&error, &self.on_nowait) {
            (ResourceError::Concurrency(ConcurrencyError::NoWaitViolated), Some(on_nowait)) => on_nowait(),
            _ => error,
        }
    }

    /// The working set.
    ///
    /// # Errors
    /// [`UnitOfWorkError::NotEntered`] or [`UnitOfWorkError::Exhausted`]
    /// outside the active state.
    pub fn get_resources(&mut self) -> Result<&mut ResourceContainer> {
        self.ensure_active()?;
        Ok(self.manager.container_mut())
    }

    /// Read-only view of the working set.
    pub fn resources(&self) -> Result<&ResourceContainer> {
        self.ensure_active()?;
        Ok(self.manager.container())
    }

    /// The loaded plan, with per-entry results.
    pub fn plan(&self) -> Result<Option<&QueryPlan>> {
        self.ensure_active()?;
        Ok(self.manager.plan())
    }

    pub fn generate_id(&self, aggregate_type: AggregateType) -> Result<EntityId> {
        self.ensure_active()?;
        self.manager.generate_id(aggregate_type)
    }

    /// Saves every change and commits. Returns the change set as written.
    #[instrument(skip(self), fields(read_only = self.manager.is_read_only()))]
    pub async fn commit(&mut self) -> Result<Vec<(AggregateType, Difference)>> {
        self.ensure_active()?;
        if self.manager.is_read_only() {
            self.state = UnitOfWorkState::Exhausted;
            return Err(UnitOfWorkError::CommitOnReadOnly.into());
        }

        let result = match self.manager.save().await {
            Ok(saved) => self
                .manager
                .repositories()
                .commit()
                .await
                .map(|()| saved)
                .map_err(ResourceError::from),
            Err(error) => Err(error),
        };

        match result {
            Ok(saved) => {
                self.state = UnitOfWorkState::Exhausted;
                info!(types = saved.len(), "unit of work committed");
                Ok(saved)
            }
            Err(error) => {
                warn!(%error, "commit failed");
                self.abort().await;
                Err(error)
            }
        }
    }

    /// Discards every change.
    #[instrument(skip(self), fields(read_only = self.manager.is_read_only()))]
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = UnitOfWorkState::Exhausted;
        if !self.manager.is_read_only() {
            self.manager.repositories().rollback().await?;
        }
        info!("unit of work rolled back");
        Ok(())
    }

    /// Ends the unit of work whatever its state: rolls back if active,
    /// otherwise just exhausts it. Closing an exhausted unit is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            UnitOfWorkState::Active => self.rollback().await,
            UnitOfWorkState::NotEntered | UnitOfWorkState::Exhausted => {
                self.state = UnitOfWorkState::Exhausted;
                Ok(())
            }
        }
    }

    /// Rolls back after a failure. The original error is what the caller
    /// sees, so a failing rollback is only logged.
    async fn abort(&mut self) {
        if self.state == UnitOfWorkState::Active && !self.manager.is_read_only() {
            if let Err(error) = self.manager.repositories().rollback().await {
                warn!(%error, "rollback after failure failed");
            }
        }
        self.state = UnitOfWorkState::Exhausted;
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.state != UnitOfWorkState::Active || self.manager.is_read_only() {
            return;
        }
        warn!("unit of work dropped while active, rolling back");
        let transaction = self.manager.repositories().transaction();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = transaction.rollback().await {
                        warn!(%error, "rollback of dropped unit of work failed");
                    }
                });
            }
            Err(_) => warn!("no tokio runtime, dropped unit of work left to the session"),
        }
    }
}

/// Opens units of work on fresh sessions.
///
/// Holds the shared lock order and the configuration; everything else is
/// per unit of work.
pub struct UnitOfWorkFactory {
    sessions: Arc<dyn SessionProvider>,
    registry: Arc<LockTotalOrderRegistry>,
    config: UnitOfWorkConfig,
    on_nowait: Option<NowaitErrorFn>,
}

impl fmt::Debug for UnitOfWorkFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWorkFactory")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl UnitOfWorkFactory {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        registry: Arc<LockTotalOrderRegistry>,
        config: UnitOfWorkConfig,
    ) -> Self {
        Self {
            sessions,
            registry,
            config,
            on_nowait: None,
        }
    }

    /// Error every unit of work reports instead of a NOWAIT failure during
    /// load.
    pub fn on_nowait<F>(mut self, on_nowait: F) -> Self
    where
        F: Fn() -> ResourceError + Send + Sync + 'static,
    {
        self.on_nowait = Some(Arc::new(on_nowait));
        self
    }

    pub fn registry(&self) -> &LockTotalOrderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    /// A not-yet-entered unit of work for `plan`.
    ///
    /// Without a plan the unit is read-only unless the configuration says
    /// otherwise; with one, the plan's intent decides.
    pub async fn create(&self, plan: Option<QueryPlan>) -> Result<UnitOfWork> {
        self.create_with_timeout(plan, self.config.wait_timeout()).await
    }

    #[instrument(skip(self, plan), fields(wait_timeout_ms = wait_timeout.as_millis() as u64))]
    pub async fn create_with_timeout(&self, plan: Option<QueryPlan>, wait_timeout: Duration) -> Result<UnitOfWork> {
        let read_only = self
            .config
            .read_only
            .unwrap_or_else(|| plan.as_ref().map_or(true, QueryPlan::is_read_only));

        let repositories = self.sessions.open_session(wait_timeout).await?;
        let manager = ResourceManager::from_config(repositories, Arc::clone(&self.registry), read_only, &self.config);

        let mut unit_of_work = UnitOfWork::new(manager);
        if let Some(plan) = plan {
            unit_of_work = unit_of_work.with_plan(plan);
        }
        if let Some(on_nowait) = &self.on_nowait {
            unit_of_work = unit_of_work.with_nowait_error(Arc::clone(on_nowait));
        }
        Ok(unit_of_work)
    }

    /// [`create`](Self::create) followed by [`UnitOfWork::enter`].
    pub async fn begin(&self, plan: Option<QueryPlan>) -> Result<UnitOfWork> {
        let mut unit_of_work = self.create(plan).await?;
        unit_of_work.enter().await?;
        Ok(unit_of_work)
    }
}
