//! Order service: the single mutation path for the store and the cache.
//!
//! Every write goes to the store first and is mirrored into the cache only
//! after the store accepts it. Reads are cache-aside.
//!
//! # Publish window
//!
//! Orders created through the API are published to the outbound topic after
//! they are stored and cached. Publishing is best effort: a failure is logged
//! and the order stays stored and cached, so downstream consumers can miss an
//! order that this service serves normally.
//!
//! # Read-through and delete
//!
//! A cache miss reads the store and then fills the cache. A delete that
//! completes between those two steps would otherwise leave the deleted order
//! cached until the next restart. Deletes bump a generation counter under the
//! same lock as their eviction, and a read-through only fills the cache if no
//! delete ran since its store read began.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use orderline_core::{Order, OrderUid, OrderValidationError};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::Publisher;
use crate::cache::{OrderCache, WarmReport};
use crate::db::{OrderStore, RepositoryError};

/// Where an order entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSource {
    /// Synchronous creation API. Successful adds are published downstream.
    Api,
    /// Inbound message stream. Never re-published.
    Stream,
}

/// Errors returned by [`OrderService`].
///
/// Store errors are translated here so callers never match on
/// [`RepositoryError`].
#[derive(Debug, Error)]
pub enum OrderError {
    /// No order has this key.
    #[error("order {0} not found")]
    NotFound(OrderUid),

    /// An order with this key is already stored.
    #[error("order {0} already exists")]
    AlreadyExists(OrderUid),

    /// The order failed validation and was not stored.
    #[error("invalid order: {0}")]
    Invalid(#[from] OrderValidationError),

    /// The store could not be reached or the query failed. Retryable.
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] RepositoryError),

    /// Stored data is inconsistent or could not be processed.
    #[error("internal error: {0}")]
    Internal(String),

    /// The cache warm did not finish within its deadline.
    #[error("cache warm timed out after {0:?}")]
    Timeout(Duration),
}

impl OrderError {
    /// Translate a store error for an operation on `uid`.
    fn from_repository(err: RepositoryError, uid: &OrderUid) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound(uid.clone()),
            RepositoryError::Conflict(_) => Self::AlreadyExists(uid.clone()),
            RepositoryError::DataCorruption(msg) => Self::Internal(msg),
            err @ RepositoryError::Database(_) => Self::Unavailable(err),
        }
    }

    /// Translate a store error for an operation not tied to one key.
    fn from_listing(err: RepositoryError) -> Self {
        match err {
            err @ RepositoryError::Database(_) => Self::Unavailable(err),
            other => Self::Internal(other.to_string()),
        }
    }

    /// Returns `true` for [`OrderError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Orchestrates the store, the cache, and the outbound publisher.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn OrderCache>,
    publisher: Option<Arc<dyn Publisher>>,
    deletes: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for OrderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService")
            .field("store", &"Arc<dyn OrderStore>")
            .field("cache", &"Arc<dyn OrderCache>")
            .field("publisher", &self.publisher.as_ref().map(|_| "Arc<dyn Publisher>"))
            .finish()
    }
}

impl OrderService {
    /// Create a new order service.
    ///
    /// With `publisher` set to `None`, API-created orders are stored and
    /// cached but not published.
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<dyn OrderCache>,
        publisher: Option<Arc<dyn Publisher>>,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            deletes: Arc::new(Mutex::new(0)),
        }
    }

    /// Store a new order, mirror it into the cache, and publish it if it came
    /// from the API.
    ///
    /// # Errors
    ///
    /// - `OrderError::Invalid` if validation fails (nothing is written)
    /// - `OrderError::AlreadyExists` if the key is already stored
    /// - `OrderError::Unavailable` if the store write fails
    ///
    /// The cache is untouched on every error path. Publish failures are not
    /// errors.
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid))]
    pub async fn add(&self, order: Order, source: OrderSource) -> Result<(), OrderError> {
        order.validate()?;

        self.store
            .add(&order)
            .await
            .map_err(|e| OrderError::from_repository(e, &order.order_uid))?;

        let payload = match source {
            OrderSource::Api => Some(order.to_json()),
            OrderSource::Stream => None,
        };
        let uid = order.order_uid.clone();

        self.cache.set(order);
        debug!("Order cached after store insert");

        if let Some(payload) = payload {
            self.publish(&uid, payload).await;
        }

        Ok(())
    }

    /// Cache-aside read.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order is neither cached nor stored.
    #[instrument(skip(self, uid), fields(order_uid = %uid))]
    pub async fn get(&self, uid: &OrderUid) -> Result<Order, OrderError> {
        if let Some(order) = self.cache.get(uid) {
            return Ok(order);
        }

        debug!("Cache miss, reading from store");
        let generation = *self.delete_generation();
        let order = self
            .store
            .get_info(uid)
            .await
            .map_err(|e| OrderError::from_repository(e, uid))?;

        {
            let current = self.delete_generation();
            if *current == generation {
                self.cache.set(order.clone());
            } else {
                debug!("Delete ran during store read, not caching");
            }
        }

        Ok(order)
    }

    /// Delete from the store, then from the cache.
    ///
    /// A crash between the two steps leaves an orphaned cache entry that is
    /// gone after the next restart's warm start.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the store has no such order. The
    /// cache is not touched if the store delete fails.
    #[instrument(skip(self, uid), fields(order_uid = %uid))]
    pub async fn delete(&self, uid: &OrderUid) -> Result<(), OrderError> {
        self.store
            .delete(uid)
            .await
            .map_err(|e| OrderError::from_repository(e, uid))?;

        {
            let mut generation = self.delete_generation();
            *generation = generation.wrapping_add(1);
            self.cache.delete(uid);
        }
        debug!("Order deleted from store and cache");
        Ok(())
    }

    /// All known order keys.
    ///
    /// An empty cache is treated as not yet warmed, and the store is asked
    /// directly.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Unavailable` if the fallback store listing fails.
    #[instrument(skip(self))]
    pub async fn list_keys(&self) -> Result<Vec<OrderUid>, OrderError> {
        let keys = self.cache.list_keys();
        if !keys.is_empty() {
            debug!(count = keys.len(), "Listed order keys from cache");
            return Ok(keys);
        }

        warn!("Cache holds no keys, listing from store");
        self.store
            .list_keys()
            .await
            .map_err(OrderError::from_listing)
    }

    /// Load every stored order into the cache, bounded by `deadline`.
    ///
    /// Orders loaded before the deadline stay cached.
    ///
    /// # Errors
    ///
    /// - `OrderError::Timeout` if the deadline passes first
    /// - `OrderError::Unavailable` if the store cannot list its keys
    #[instrument(skip(self))]
    pub async fn warm_cache(&self, deadline: Duration) -> Result<WarmReport, OrderError> {
        let load = self.cache.load_from_store(self.store.as_ref());

        match tokio::time::timeout(deadline, load).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(OrderError::from_listing(e)),
            Err(_) => {
                warn!(cached = self.cache.len(), "Cache warm deadline exceeded");
                Err(OrderError::Timeout(deadline))
            }
        }
    }

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Unavailable` if it is not.
    pub async fn ping(&self) -> Result<(), OrderError> {
        self.store.ping().await.map_err(OrderError::from_listing)
    }

    fn delete_generation(&self) -> MutexGuard<'_, u64> {
        self.deletes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn publish(&self, uid: &OrderUid, payload: Result<Vec<u8>, serde_json::Error>) {
        let Some(publisher) = &self.publisher else {
            debug!("No publisher configured, skipping publish");
            return;
        };

        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize order for publishing");
                return;
            }
        };

        match publisher.publish(uid.as_bytes(), &payload).await {
            Ok(()) => info!("Order published"),
            Err(e) => error!(
                error = %e,
                "Failed to publish order; it is stored and cached but was not sent downstream"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_translation() {
        let uid = OrderUid::new("UID1");

        assert!(OrderError::from_repository(RepositoryError::NotFound, &uid).is_not_found());
        assert!(matches!(
            OrderError::from_repository(RepositoryError::Conflict("dup".into()), &uid),
            OrderError::AlreadyExists(ref u) if *u == uid
        ));
        assert!(matches!(
            OrderError::from_repository(RepositoryError::DataCorruption("bad".into()), &uid),
            OrderError::Internal(_)
        ));
        assert!(matches!(
            OrderError::from_repository(RepositoryError::Database(sqlx::Error::PoolClosed), &uid),
            OrderError::Unavailable(_)
        ));
    }

    #[test]
    fn test_listing_error_translation() {
        assert!(matches!(
            OrderError::from_listing(RepositoryError::Database(sqlx::Error::PoolTimedOut)),
            OrderError::Unavailable(_)
        ));
        assert!(matches!(
            OrderError::from_listing(RepositoryError::NotFound),
            OrderError::Internal(_)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = OrderError::NotFound(OrderUid::new("UID1"));
        assert_eq!(err.to_string(), "order UID1 not found");

        let err = OrderError::from(OrderValidationError::EmptyUid);
        assert_eq!(err.to_string(), "invalid order: order uid cannot be empty");
    }
}
