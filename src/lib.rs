//! # Shop Unit of Work
//!
//! > **A transactional object cache with deterministic lock ordering.**
//!
//! Each use case gets its own working set of domain aggregates: loaded
//! according to a declared query plan, identity-mapped, change-tracked by
//! snapshot, and written back as one diff at commit.
//!
//! ## 🏗️ Design
//!
//! ### Declare, then load
//! A use case says up front what it needs and which locks it takes, through
//! [`QueryPlanBuilder`](query::QueryPlanBuilder). Malformed plans are
//! rejected by `build()`, before any transaction begins.
//!
//! ### Diff, don't track
//! Aggregates are plain structs. Nothing records mutations as they happen;
//! instead the [`ResourceContainer`](container::ResourceContainer) compares
//! serialized snapshots taken at entry and at save. Changing a field and
//! changing it back is no change.
//!
//! ### One lock order for everyone
//! [`LockTotalOrderRegistry`](lock_order::LockTotalOrderRegistry) ranks the
//! aggregate types. Mutating plans must lock in ascending rank, so two
//! transactions can never wait on each other in opposite order.
//!
//! ### Single-use transactions
//! A [`UnitOfWork`](unit_of_work::UnitOfWork) is entered once and ends in
//! commit or rollback. After that every call fails with `Exhausted`.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Domain ([`model`])
//! - **Key items**: [`EntityId`](model::EntityId),
//!   [`AggregateType`](model::AggregateType), the [`Aggregate`](model::Aggregate)
//!   sum type and the [`AggregateRoot`](model::AggregateRoot) trait.
//! - The shop's aggregates: [`Customer`](model::Customer),
//!   [`PurchaseActive`](model::PurchaseActive), [`Product`](model::Product).
//!
//! ### 2. Planning ([`query`], [`reference`], [`lock_order`])
//! - **Role**: describe what to load, in which order, under which locks.
//! - Chained entries feed one entry's results into the next; [`reference`]
//!   knows the standard chains between aggregate types.
//!
//! ### 3. The Working Set ([`container`])
//! - **Role**: identity map plus snapshot diff. Never talks to storage.
//!
//! ### 4. The Transaction ([`manager`], [`unit_of_work`])
//! - [`ResourceManager`](manager::ResourceManager) executes plans and saves
//!   diffs.
//! - [`UnitOfWork`](unit_of_work::UnitOfWork) owns the state machine;
//!   [`UnitOfWorkFactory`](unit_of_work::UnitOfWorkFactory) opens them.
//!
//! ### 5. Storage ([`persistence`])
//! - **Role**: the repository and transaction traits storage must provide,
//!   plus [`persistence::memory`], an in-process store.
//!
//! ### 6. Wiring ([`lifecycle`], [`config`])
//! - [`ShopSystem`](lifecycle::ShopSystem) assembles registry, store and
//!   factory; [`lifecycle::tracing`] sets up logging.
//!
//! ## 🚀 Quick Start
//!
//! ```rust
//! use shop_uow::lifecycle::ShopSystem;
//! use shop_uow::model::{AggregateType, EntityId, Product};
//! use shop_uow::query::QueryPlanBuilder;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let system = ShopSystem::in_memory();
//! let widget = Product::new(EntityId::new(), "Widget", "W-1", 10, 250);
//! let id = widget.entity_id;
//! system.database.seed([widget]).await?;
//!
//! let plan = QueryPlanBuilder::mutating(system.registry())
//!     .load(AggregateType::Product)
//!     .from_id([id])
//!     .for_update()
//!     .build()?;
//!
//! let mut unit_of_work = system.factory.begin(Some(plan)).await?;
//! unit_of_work.get_resources()?.get_mut::<Product>(id)?.reserve(3)?;
//! unit_of_work.commit().await?;
//!
//! let stored = system.database.fetch::<Product>(id).await?.unwrap();
//! assert_eq!(stored.amount, 7);
//! # Ok(())
//! # }
//! ```
//!
//! ## 🧯 Errors
//!
//! See [`error`]. Only [`ConcurrencyError`](error::ConcurrencyError) is
//! worth retrying, in a fresh unit of work; nothing retries automatically.

pub mod config;
pub mod container;
pub mod error;
pub mod lifecycle;
pub mod lock_order;
pub mod manager;
pub mod model;
pub mod persistence;
pub mod query;
pub mod reference;
pub mod unit_of_work;

pub use error::{ResourceError, Result};
