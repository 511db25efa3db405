//! Business logic services.
//!
//! # Services
//!
//! - `orders` - Add, read, delete, and list orders; warm the cache

pub mod orders;

pub use orders::{OrderError, OrderService, OrderSource};
