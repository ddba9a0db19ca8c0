//! The active purchase aggregate: a customer's paid-for but not yet
//! finalized order, holding one item per product.

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::ids::EntityId;

/// One line of a purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub product_id: EntityId,
    pub amount: u32,
}

impl PurchaseItem {
    /// # Errors
    /// Fails with [`DomainError::InvalidAmount`] for a zero amount.
    pub fn new(product_id: EntityId, amount: u32) -> Result<Self, DomainError> {
        if amount == 0 {
            return Err(DomainError::InvalidAmount(amount));
        }
        Ok(Self { product_id, amount })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseState {
    Active,
    Finalized,
}

impl PurchaseState {
    fn name(&self) -> &'static str {
        match self {
            PurchaseState::Active => "ACTIVE",
            PurchaseState::Finalized => "FINALIZED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseActive {
    pub entity_id: EntityId,
    pub customer_id: EntityId,
    pub state: PurchaseState,
    items: Vec<PurchaseItem>,
}

impl PurchaseActive {
    /// Creates an active purchase.
    ///
    /// # Errors
    /// Fails with [`DomainError::DuplicateItem`] if two items share a product.
    pub fn new(
        entity_id: EntityId,
        customer_id: EntityId,
        items: Vec<PurchaseItem>,
    ) -> Result<Self, DomainError> {
        let mut purchase = Self {
            entity_id,
            customer_id,
            state: PurchaseState::Active,
            items: Vec::with_capacity(items.len()),
        };
        for item in items {
            purchase.add_item(item)?;
        }
        Ok(purchase)
    }

    fn add_item(&mut self, item: PurchaseItem) -> Result<(), DomainError> {
        if self.items.iter().any(|i| i.product_id == item.product_id) {
            return Err(DomainError::DuplicateItem(item.product_id));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn items(&self) -> &[PurchaseItem] {
        &self.items
    }

    pub fn item(&self, product_id: EntityId) -> Option<&PurchaseItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    pub fn product_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.items.iter().map(|i| i.product_id)
    }

    /// Moves the purchase to FINALIZED.
    ///
    /// # Errors
    /// Fails with [`DomainError::InvalidTransition`] unless currently ACTIVE.
    pub fn finalize(&mut self) -> Result<(), DomainError> {
        match self.state {
            PurchaseState::Active => {
                self.state = PurchaseState::Finalized;
                Ok(())
            }
            other => Err(DomainError::InvalidTransition {
                from: other.name(),
                to: PurchaseState::Finalized.name(),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == PurchaseState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_products() {
        let product = EntityId::new();
        let items = vec![
            PurchaseItem::new(product, 1).unwrap(),
            PurchaseItem::new(product, 2).unwrap(),
        ];
        let err = PurchaseActive::new(EntityId::new(), EntityId::new(), items).unwrap_err();
        assert_eq!(err, DomainError::DuplicateItem(product));
    }

    #[test]
    fn finalize_is_one_way() {
        let mut purchase = PurchaseActive::new(EntityId::new(), EntityId::new(), vec![]).unwrap();
        purchase.finalize().unwrap();
        assert!(!purchase.is_active());
        assert!(matches!(
            purchase.finalize(),
            Err(DomainError::InvalidTransition { from: "FINALIZED", .. })
        ));
    }

    #[test]
    fn zero_amount_items_are_rejected() {
        assert_eq!(
            PurchaseItem::new(EntityId::new(), 0),
            Err(DomainError::InvalidAmount(0))
        );
    }
}
