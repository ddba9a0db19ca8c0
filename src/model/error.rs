//! Error types for domain rule violations.

use thiserror::Error;

use super::ids::EntityId;

/// Errors raised by aggregate methods when a business rule would be broken.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DomainError {
    /// The requested quantity exceeds the available stock.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },

    /// Item amounts must be strictly positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(u32),

    /// The purchase already holds an item for this product.
    #[error("Item already added for product {0}")]
    DuplicateItem(EntityId),

    /// The purchase is not in a state that allows the transition.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}
