//! Domain aggregates and their identity/serialization contract.

pub mod aggregate;
pub mod customer;
pub mod error;
pub mod ids;
pub mod product;
pub mod purchase;

pub use aggregate::*;
pub use customer::*;
pub use error::*;
pub use ids::*;
pub use product::*;
pub use purchase::*;
