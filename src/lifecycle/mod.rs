pub mod shop_system;
pub mod tracing;

pub use shop_system::ShopSystem;
