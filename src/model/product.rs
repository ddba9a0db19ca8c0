//! The product aggregate: a stocked, priced item of the inventory.
//!
//! # Aggregate
//! [`Product`] implements [`AggregateRoot`](crate::model::AggregateRoot),
//! so it can be loaded into a [`ResourceContainer`](crate::container::ResourceContainer)
//! and change-tracked by snapshot.
//!
//! `amount` is the stock on hand. It can never go below zero: `reserve`
//! refuses to take more than is available.
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::ids::EntityId;

/// Represents a product in the inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub entity_id: EntityId,
    pub name: String,
    pub sku: String,
    pub amount: u32,
    /// Unit price in cents.
    pub price: u64,
}

impl Product {
    /// Creates a new Product instance.
    ///
    /// # Arguments
    /// * `entity_id` - Unique identifier
    /// * `name` - Product name
    /// * `sku` - Stock keeping unit, unique per product
    /// * `amount` - Available stock quantity
    /// * `price` - Unit price in cents
    pub fn new(
        entity_id: EntityId,
        name: impl Into<String>,
        sku: impl Into<String>,
        amount: u32,
        price: u64,
    ) -> Self {
        Self {
            entity_id,
            name: name.into(),
            sku: sku.into(),
            amount,
            price,
        }
    }

    /// Takes `amount` units out of stock.
    ///
    /// # Errors
    /// Fails with [`DomainError::InsufficientStock`] if the request exceeds stock.
    pub fn reserve(&mut self, amount: u32) -> Result<(), DomainError> {
        if amount > self.amount {
            return Err(DomainError::InsufficientStock {
                requested: amount,
                available: self.amount,
            });
        }
        self.amount -= amount;
        Ok(())
    }

    /// Puts `amount` units back into stock.
    pub fn restock(&mut self, amount: u32) {
        self.amount = self.amount.saturating_add(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_never_goes_negative() {
        let mut product = Product::new(EntityId::new(), "Widget", "W-1", 5, 100);
        product.reserve(3).unwrap();
        assert_eq!(product.amount, 2);

        let err = product.reserve(3).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                requested: 3,
                available: 2
            }
        );
        assert_eq!(product.amount, 2);

        product.restock(8);
        assert_eq!(product.amount, 10);
    }
}
