//! Persistence for order aggregates.
//!
//! # Database
//!
//! ## Tables
//!
//! - `orders` - Order header, keyed by `order_uid`
//! - `delivery_info` - One row per order (`order_uid` PK/FK)
//! - `payments` - One row per order, keyed by `transaction_uid` (= `order_uid`)
//! - `items` - Zero or more rows per order, in insertion order
//!
//! Child tables cascade on delete of the order header.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p orderline-cli -- migrate
//! ```

pub mod orders;

use std::time::Duration;

use async_trait::async_trait;
use orderline_core::{Order, OrderUid};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use orders::PgOrderStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate order key).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Durable storage of order aggregates.
///
/// Implementations must write all four relations of an aggregate atomically
/// and must report an absent key as [`RepositoryError::NotFound`], distinct
/// from infrastructure failures.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new aggregate.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the key already exists.
    async fn add(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Load the full aggregate for `uid`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no order has this key.
    async fn get_info(&self, uid: &OrderUid) -> Result<Order, RepositoryError>;

    /// Remove the aggregate for `uid`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no order has this key.
    async fn delete(&self, uid: &OrderUid) -> Result<(), RepositoryError>;

    /// List every stored order key.
    async fn list_keys(&self) -> Result<Vec<OrderUid>, RepositoryError>;

    /// Check that the backing store is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
