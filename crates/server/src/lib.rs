//! Orderline order service library.
//!
//! The binary in `main.rs` wires these modules together; the library form
//! lets the integration tests drive the service, the ingest loop, and the
//! router against in-memory fakes.
//!
//! # Modules
//!
//! - `db` - `OrderStore` seam and its `PostgreSQL` implementation
//! - `cache` - In-memory read model
//! - `broker` - Publisher and message-source seams, the ingest loop, Kafka clients
//! - `services` - Order service tying store, cache, and publisher together
//! - `routes` - HTTP surface

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod broker;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
