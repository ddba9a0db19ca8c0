//! # Domain References
//!
//! Which attribute of a target aggregate points back at a source aggregate,
//! and how to pull the matching values out of a loaded source. This is what
//! lets a plan say "load the products of the purchase I just loaded" without
//! spelling out the extraction itself:
//!
//! ```rust
//! use shop_uow::lock_order::LockTotalOrderRegistry;
//! use shop_uow::model::{AggregateType, EntityId};
//! use shop_uow::query::QueryPlanBuilder;
//!
//! let registry = LockTotalOrderRegistry::standard();
//! let plan = QueryPlanBuilder::mutating(&registry)
//!     .load(AggregateType::PurchaseActive)
//!     .from_id([EntityId::new()])
//!     .for_update()
//!     .load(AggregateType::Product)
//!     .from_reference(None)
//!     .for_update()
//!     .build()
//!     .unwrap();
//! assert_eq!(plan.entries()[1].source_index(), Some(0));
//! ```
//!
//! The table is a `match`, so it is fixed at compile time.

use serde_json::Value;

use crate::model::{Aggregate, AggregateType};
use crate::query::ValueExtractor;

/// How a target type's attribute is derived from a loaded source aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceDescriptor {
    /// Attribute of the target aggregate to match.
    pub attribute: &'static str,
    pub extractor: ValueExtractor,
}

/// Looks up the reference from `source` to `target`, if the domain has one.
pub fn reference(source: AggregateType, target: AggregateType) -> Option<ReferenceDescriptor> {
    use AggregateType::*;

    match (source, target) {
        (Customer, PurchaseActive) => Some(descriptor("customer_id", own_id)),
        (PurchaseActive, Customer) => Some(descriptor("entity_id", purchase_customer_id)),
        (PurchaseActive, Product) => Some(descriptor("entity_id", purchase_product_ids)),
        _ => None,
    }
}

fn descriptor(attribute: &'static str, extract: fn(&Aggregate) -> Vec<Value>) -> ReferenceDescriptor {
    ReferenceDescriptor {
        attribute,
        extractor: ValueExtractor::new(extract),
    }
}

fn own_id(aggregate: &Aggregate) -> Vec<Value> {
    vec![aggregate.entity_id().to_value()]
}

fn purchase_customer_id(aggregate: &Aggregate) -> Vec<Value> {
    aggregate
        .as_purchase_active()
        .map(|p| vec![p.customer_id.to_value()])
        .unwrap_or_default()
}

fn purchase_product_ids(aggregate: &Aggregate) -> Vec<Value> {
    aggregate
        .as_purchase_active()
        .map(|p| p.product_ids().map(|id| id.to_value()).collect())
        .unwrap_or_default()
}
