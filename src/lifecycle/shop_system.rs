use std::sync::Arc;
use tracing::info;

use crate::config::UnitOfWorkConfig;
use crate::lock_order::LockTotalOrderRegistry;
use crate::persistence::memory::InMemoryDatabase;
use crate::unit_of_work::UnitOfWorkFactory;

/// Wires the shared pieces of the shop together over an in-memory store.
///
/// `ShopSystem` owns:
/// - **Lock order**: one [`LockTotalOrderRegistry`], built at start-up and
///   shared by every plan and unit of work.
/// - **Storage**: the [`InMemoryDatabase`] every session opens against.
/// - **Factory**: the [`UnitOfWorkFactory`] use cases draw units of work from.
///
/// # Example
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use shop_uow::lifecycle::ShopSystem;
/// use shop_uow::query::QueryPlanBuilder;
///
/// let system = ShopSystem::in_memory();
/// let plan = QueryPlanBuilder::read_only(system.registry()).build().unwrap();
/// let mut unit_of_work = system.factory.begin(Some(plan)).await.unwrap();
/// unit_of_work.close().await.unwrap();
/// # }
/// ```
pub struct ShopSystem {
    pub database: InMemoryDatabase,
    pub factory: UnitOfWorkFactory,
    registry: Arc<LockTotalOrderRegistry>,
}

impl ShopSystem {
    /// Standard lock order and default configuration.
    pub fn in_memory() -> Self {
        Self::with_config(UnitOfWorkConfig::default())
    }

    pub fn with_config(config: UnitOfWorkConfig) -> Self {
        Self::with_registry(LockTotalOrderRegistry::standard(), config)
    }

    pub fn with_registry(registry: LockTotalOrderRegistry, config: UnitOfWorkConfig) -> Self {
        let registry = Arc::new(registry);
        let database = InMemoryDatabase::new();
        info!(
            wait_timeout_ms = config.wait_timeout_ms,
            raise_on_not_found = config.raise_on_not_found,
            "shop system ready"
        );
        let factory = UnitOfWorkFactory::new(Arc::new(database.clone()), Arc::clone(&registry), config);
        Self {
            database,
            factory,
            registry,
        }
    }

    pub fn registry(&self) -> &LockTotalOrderRegistry {
        &self.registry
    }
}
