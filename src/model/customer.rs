use serde::{Deserialize, Serialize};

use super::ids::EntityId;

/// A registered customer.
///
/// Customers sit first in the lock order: a transaction touching a customer
/// and its purchases locks the customer row before anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub entity_id: EntityId,
    pub name: String,
    pub email: String,
}

impl Customer {
    /// Creates a new Customer instance.
    ///
    /// # Arguments
    /// * `entity_id` - Unique identifier
    /// * `name` - Display name
    /// * `email` - Contact address
    pub fn new(entity_id: EntityId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            entity_id,
            name: name.into(),
            email: email.into(),
        }
    }
}
