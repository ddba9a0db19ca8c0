//! # Shop Unit of Work Demo
//!
//! Walks one purchase through the store:
//! 1. Seeds a customer, two products and an active purchase.
//! 2. Finalizes the purchase in one mutating unit of work that locks the
//!    customer, the purchase and its products in lock order, reserving
//!    stock for every item.
//! 3. Reads the stock back in a read-only unit of work.

use std::fmt::Display;

use shop_uow::config::UnitOfWorkConfig;
use shop_uow::lifecycle::tracing::setup_tracing;
use shop_uow::lifecycle::ShopSystem;
use shop_uow::model::{AggregateType, Customer, EntityId, Product, PurchaseActive, PurchaseItem};
use shop_uow::query::QueryPlanBuilder;
use tracing::{info, Instrument};

fn fail(e: impl Display) -> String {
    e.to_string()
}

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = UnitOfWorkConfig::default().with_env_overrides().map_err(fail)?;
    let system = ShopSystem::with_config(config);

    // Seed
    let customer = Customer::new(EntityId::new(), "Alice", "alice@example.com");
    let lamp = Product::new(EntityId::new(), "Desk Lamp", "LAMP-1", 10, 3_499);
    let chair = Product::new(EntityId::new(), "Office Chair", "CHAIR-1", 4, 12_900);
    let purchase = PurchaseActive::new(
        EntityId::new(),
        customer.entity_id,
        vec![
            PurchaseItem::new(lamp.entity_id, 3).map_err(fail)?,
            PurchaseItem::new(chair.entity_id, 1).map_err(fail)?,
        ],
    )
    .map_err(fail)?;
    let (customer_id, purchase_id) = (customer.entity_id, purchase.entity_id);

    system.database.seed([customer]).await.map_err(fail)?;
    system.database.seed([lamp, chair]).await.map_err(fail)?;
    system.database.seed([purchase]).await.map_err(fail)?;

    // Finalize
    let span = tracing::info_span!("finalize_purchase", %purchase_id);
    async {
        let plan = QueryPlanBuilder::mutating(system.registry())
            .load(AggregateType::Customer)
            .from_id([customer_id])
            .for_share()
            .load(AggregateType::PurchaseActive)
            .from_id([purchase_id])
            .for_update()
            .load(AggregateType::Product)
            .from_reference(None)
            .for_update()
            .build()
            .map_err(fail)?;

        let mut unit_of_work = system.factory.begin(Some(plan)).await.map_err(fail)?;
        let resources = unit_of_work.get_resources().map_err(fail)?;

        let items = resources
            .get::<PurchaseActive>(purchase_id)
            .map_err(fail)?
            .items()
            .to_vec();
        for item in items {
            resources
                .get_mut::<Product>(item.product_id)
                .map_err(fail)?
                .reserve(item.amount)
                .map_err(fail)?;
        }
        resources
            .get_mut::<PurchaseActive>(purchase_id)
            .map_err(fail)?
            .finalize()
            .map_err(fail)?;

        let saved = unit_of_work.commit().await.map_err(fail)?;
        for (aggregate_type, difference) in &saved {
            info!(
                %aggregate_type,
                created = difference.created.len(),
                updated = difference.updated.len(),
                deleted = difference.deleted.len(),
                "written"
            );
        }
        Ok::<_, String>(())
    }
    .instrument(span)
    .await?;

    // Read back
    let plan = QueryPlanBuilder::read_only(system.registry())
        .load(AggregateType::Product)
        .from_attribute("sku", ["LAMP-1", "CHAIR-1"])
        .order_by("price", false)
        .build()
        .map_err(fail)?;
    let mut unit_of_work = system.factory.begin(Some(plan)).await.map_err(fail)?;
    for product in unit_of_work.resources().map_err(fail)?.all::<Product>() {
        info!(sku = %product.sku, amount = product.amount, "stock");
    }
    unit_of_work.close().await.map_err(fail)?;

    info!("demo finished");
    Ok(())
}
