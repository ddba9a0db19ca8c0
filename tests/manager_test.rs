use std::sync::Arc;

use shop_uow::error::{ResourceError, UnitOfWorkError};
use shop_uow::lock_order::LockTotalOrderRegistry;
use shop_uow::manager::ResourceManager;
use shop_uow::model::{Aggregate, AggregateType, Customer, EntityId, Product, PurchaseActive, PurchaseItem};
use shop_uow::persistence::memory::{InMemoryDatabase, TxnEvent};
use shop_uow::query::QueryPlanBuilder;

fn manager(database: &InMemoryDatabase, read_only: bool) -> ResourceManager {
    let repositories = database
        .repository_container()
        .expect("Failed to build repositories");
    ResourceManager::new(
        repositories,
        Arc::new(LockTotalOrderRegistry::standard()),
        read_only,
    )
}

async fn seed_products(database: &InMemoryDatabase) -> (Product, Product) {
    let lamp = Product::new(EntityId::new(), "Lamp", "LAMP-1", 10, 3_499);
    let chair = Product::new(EntityId::new(), "Chair", "CHAIR-1", 4, 12_900);
    database
        .seed([lamp.clone(), chair.clone()])
        .await
        .expect("Failed to seed products");
    (lamp, chair)
}

fn policy_violation_for(err: &ResourceError) -> Option<AggregateType> {
    match err {
        ResourceError::UnitOfWork(UnitOfWorkError::PolicyViolation { aggregate_type, .. }) => Some(*aggregate_type),
        _ => None,
    }
}

#[tokio::test]
async fn unmatched_sku_fails_when_strict() {
    let database = InMemoryDatabase::new();
    seed_products(&database).await;
    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::read_only(&registry)
        .load(AggregateType::Product)
        .from_attribute("sku", ["X"])
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, true);
    let err = manager.load(plan).await.unwrap_err();
    match err {
        ResourceError::NotFound(not_found) => {
            assert_eq!(not_found.aggregate_type, AggregateType::Product);
            assert!(not_found.ids.is_empty());
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn unmatched_sku_is_empty_when_lenient() {
    let database = InMemoryDatabase::new();
    seed_products(&database).await;
    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::read_only(&registry)
        .load(AggregateType::Product)
        .from_attribute("sku", ["X"])
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, true).with_raise_on_not_found(false);
    manager.load(plan).await.expect("Failed to load");

    assert_eq!(manager.container().len(AggregateType::Product), 0);
    let plan = manager.plan().expect("No plan loaded");
    assert_eq!(plan.entries()[0].result(), Some(&[][..]));
}

#[tokio::test]
async fn windowed_lookup_may_come_back_short() {
    let database = InMemoryDatabase::new();
    seed_products(&database).await;
    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::read_only(&registry)
        .load(AggregateType::Product)
        .from_attribute("sku", ["X"])
        .limit(5)
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, true);
    manager.load(plan).await.expect("Windowed lookups are never strict");
}

#[tokio::test]
async fn or_criteria_and_ordering_are_applied() {
    let database = InMemoryDatabase::new();
    let (lamp, chair) = seed_products(&database).await;
    database
        .seed([Product::new(EntityId::new(), "Desk", "DESK-1", 1, 29_900)])
        .await
        .expect("Failed to seed");
    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::read_only(&registry)
        .load(AggregateType::Product)
        .from_attribute("sku", ["CHAIR-1"])
        .or_()
        .from_attribute("sku", ["LAMP-1"])
        .order_by("price", true)
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, true);
    manager.load(plan).await.expect("Failed to load");

    let plan = manager.plan().expect("No plan loaded");
    assert_eq!(
        plan.entries()[0].result(),
        Some(&[chair.entity_id, lamp.entity_id][..])
    );
}

#[tokio::test]
async fn previous_results_feed_custom_extractors() {
    let database = InMemoryDatabase::new();
    let (lamp, _) = seed_products(&database).await;
    let customer = Customer::new(EntityId::new(), "Alice", "alice@example.com");
    let other = Customer::new(EntityId::new(), "Bob", "bob@example.com");
    let purchase = PurchaseActive::new(
        EntityId::new(),
        customer.entity_id,
        vec![PurchaseItem::new(lamp.entity_id, 1).expect("Invalid item")],
    )
    .expect("Invalid purchase");
    let foreign = PurchaseActive::new(EntityId::new(), other.entity_id, Vec::new()).expect("Invalid purchase");
    let customer_id = customer.entity_id;
    database.seed([customer, other]).await.expect("Failed to seed");
    database
        .seed([purchase.clone(), foreign])
        .await
        .expect("Failed to seed");

    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::read_only(&registry)
        .load(AggregateType::Customer)
        .from_id([customer_id])
        .load(AggregateType::PurchaseActive)
        .from_previous(Some(0), "customer_id", |a: &Aggregate| vec![a.entity_id().to_value()])
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, true);
    manager.load(plan).await.expect("Failed to load");

    let purchases: Vec<&PurchaseActive> = manager.container().all::<PurchaseActive>().collect();
    assert_eq!(purchases, vec![&purchase]);
}

#[tokio::test]
async fn plan_intent_must_match_manager_mode() {
    let database = InMemoryDatabase::new();
    let (lamp, _) = seed_products(&database).await;
    let registry = LockTotalOrderRegistry::standard();

    let mutating = QueryPlanBuilder::mutating(&registry)
        .load(AggregateType::Product)
        .from_id([lamp.entity_id])
        .for_update()
        .build()
        .expect("Failed to build plan");
    let err = manager(&database, true).load(mutating).await.unwrap_err();
    assert_eq!(
        err,
        ResourceError::UnitOfWork(UnitOfWorkError::ReadOnlyMismatch {
            manager_read_only: true,
            plan_mutating: true,
        })
    );

    let read_only = QueryPlanBuilder::read_only(&registry)
        .load(AggregateType::Product)
        .from_id([lamp.entity_id])
        .build()
        .expect("Failed to build plan");
    let err = manager(&database, false).load(read_only).await.unwrap_err();
    assert!(matches!(
        err,
        ResourceError::UnitOfWork(UnitOfWorkError::ReadOnlyMismatch { .. })
    ));
}

#[tokio::test]
async fn a_loaded_plan_cannot_be_loaded_again() {
    let database = InMemoryDatabase::new();
    let (lamp, _) = seed_products(&database).await;
    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::read_only(&registry)
        .load(AggregateType::Product)
        .from_id([lamp.entity_id])
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, true);
    manager.load(plan).await.expect("Failed to load");
    let loaded = manager.plan().cloned().expect("No plan loaded");

    assert_eq!(
        manager.load(loaded).await.unwrap_err(),
        ResourceError::UnitOfWork(UnitOfWorkError::AlreadyLoaded(0))
    );
}

#[tokio::test]
async fn shared_lock_does_not_cover_an_update() {
    let database = InMemoryDatabase::new();
    let (lamp, _) = seed_products(&database).await;
    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::mutating(&registry)
        .load(AggregateType::Product)
        .from_id([lamp.entity_id])
        .for_share()
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, false);
    manager.load(plan).await.expect("Failed to load");
    manager.take_baseline().expect("Failed to take baseline");
    manager
        .container_mut()
        .get_mut::<Product>(lamp.entity_id)
        .expect("Product not loaded")
        .price = 1;

    let err = manager.save().await.unwrap_err();
    assert_eq!(policy_violation_for(&err), Some(AggregateType::Product));
}

#[tokio::test]
async fn update_without_a_locking_query_is_rejected() {
    let database = InMemoryDatabase::new();
    let mut manager = manager(&database, false);
    let product = Product::new(EntityId::new(), "Lamp", "LAMP-1", 10, 3_499);
    let id = product.entity_id;
    manager.container_mut().insert(product);
    manager.take_baseline().expect("Failed to take baseline");

    manager
        .container_mut()
        .get_mut::<Product>(id)
        .expect("Product missing")
        .amount = 9;

    let err = manager.save().await.unwrap_err();
    assert_eq!(policy_violation_for(&err), Some(AggregateType::Product));
}

#[tokio::test]
async fn read_only_manager_rejects_any_change() {
    let database = InMemoryDatabase::new();
    let (lamp, _) = seed_products(&database).await;
    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::read_only(&registry)
        .load(AggregateType::Product)
        .from_id([lamp.entity_id])
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, true);
    manager.load(plan).await.expect("Failed to load");
    manager.take_baseline().expect("Failed to take baseline");
    manager
        .container_mut()
        .insert(Customer::new(EntityId::new(), "Eve", "eve@example.com"));

    let err = manager.save().await.unwrap_err();
    assert_eq!(policy_violation_for(&err), Some(AggregateType::Customer));
}

#[tokio::test]
async fn unchanged_working_set_saves_nothing() {
    let database = InMemoryDatabase::new();
    let (lamp, _) = seed_products(&database).await;
    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::mutating(&registry)
        .load(AggregateType::Product)
        .from_id([lamp.entity_id])
        .for_update()
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, false);
    manager.load(plan).await.expect("Failed to load");
    manager.take_baseline().expect("Failed to take baseline");

    let product = manager
        .container_mut()
        .get_mut::<Product>(lamp.entity_id)
        .expect("Product not loaded");
    product.amount = 1;
    product.amount = 10;

    let saved = manager.save().await.expect("Failed to save");
    assert!(saved.is_empty());
    assert!(!database
        .events()
        .await
        .iter()
        .any(|e| matches!(e, TxnEvent::Saved { .. })));
}

#[tokio::test]
async fn dependents_are_written_first() {
    let database = InMemoryDatabase::new();
    let (lamp, _) = seed_products(&database).await;
    let customer = Customer::new(EntityId::new(), "Alice", "alice@example.com");
    let customer_id = customer.entity_id;
    database.seed([customer]).await.expect("Failed to seed");

    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::mutating(&registry)
        .load(AggregateType::Customer)
        .from_id([customer_id])
        .for_update()
        .load(AggregateType::Product)
        .from_id([lamp.entity_id])
        .for_update()
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, false);
    manager.load(plan).await.expect("Failed to load");
    manager.take_baseline().expect("Failed to take baseline");

    let container = manager.container_mut();
    container
        .get_mut::<Customer>(customer_id)
        .expect("Customer not loaded")
        .name = "Alice B.".into();
    container
        .get_mut::<Product>(lamp.entity_id)
        .expect("Product not loaded")
        .amount = 0;

    let saved = manager.save().await.expect("Failed to save");
    let order: Vec<AggregateType> = saved.iter().map(|(t, _)| *t).collect();
    assert_eq!(order, vec![AggregateType::Product, AggregateType::Customer]);

    let written: Vec<AggregateType> = database
        .events()
        .await
        .into_iter()
        .filter_map(|e| match e {
            TxnEvent::Saved { aggregate_type, .. } => Some(aggregate_type),
            _ => None,
        })
        .collect();
    assert_eq!(written, order);
}

#[tokio::test]
async fn chained_lookup_tolerates_missing_references() {
    let database = InMemoryDatabase::new();
    let (lamp, _) = seed_products(&database).await;
    let discontinued = EntityId::new();
    let customer = Customer::new(EntityId::new(), "Alice", "alice@example.com");
    let purchase = PurchaseActive::new(
        EntityId::new(),
        customer.entity_id,
        vec![
            PurchaseItem::new(lamp.entity_id, 1).expect("Invalid item"),
            PurchaseItem::new(discontinued, 2).expect("Invalid item"),
        ],
    )
    .expect("Invalid purchase");
    let purchase_id = purchase.entity_id;
    database.seed([customer]).await.expect("Failed to seed");
    database.seed([purchase]).await.expect("Failed to seed");

    let registry = LockTotalOrderRegistry::standard();
    let plan = QueryPlanBuilder::read_only(&registry)
        .load(AggregateType::PurchaseActive)
        .from_id([purchase_id])
        .load(AggregateType::Product)
        .from_reference(None)
        .build()
        .expect("Failed to build plan");

    let mut manager = manager(&database, true);
    manager
        .load(plan)
        .await
        .expect("Chained lookups are never strict");

    let plan = manager.plan().expect("No plan loaded");
    assert_eq!(plan.entries()[1].result(), Some(&[lamp.entity_id][..]));
    assert!(!manager.container().contains(AggregateType::Product, discontinued));
}
