//! Core types for Orderline.
//!
//! The order aggregate and its key.

pub mod id;
pub mod order;

pub use id::OrderUid;
pub use order::{DeliveryInfo, Item, Order, OrderValidationError, Payment};
