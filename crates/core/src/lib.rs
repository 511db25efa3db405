//! Orderline Core - Shared types library.
//!
//! This crate provides the order aggregate used across all Orderline components:
//! - `server` - HTTP API, cache, store adapter, and Kafka ingestion
//! - `cli` - Command-line tools for migrations and seeding
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no broker
//! clients. The optional `postgres` feature adds `sqlx` encoding for
//! [`OrderUid`].
//!
//! # Modules
//!
//! - [`types`] - The order aggregate, its key, and validation

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
