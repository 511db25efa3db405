//! In-memory read model of the order store.
//!
//! The cache maps order keys to complete aggregates. It is unbounded and never
//! expires entries; it only changes through [`OrderCache::set`],
//! [`OrderCache::delete`], and [`OrderCache::load_from_store`], all of which
//! are driven by the order service.
//!
//! # Locking
//!
//! Reads take the shared side of an `RwLock`, every mutation (including each
//! per-key write during a warm start) takes the exclusive side. A poisoned
//! lock is recovered rather than propagated: every critical section is a
//! single `HashMap` insert, remove, or read, so the map is never left
//! half-updated by a panicking holder.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use orderline_core::{Order, OrderUid};
use tracing::{debug, error, info, warn};

use crate::db::{OrderStore, RepositoryError};

/// Outcome of a warm start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Keys returned by the store listing.
    pub listed: usize,
    /// Aggregates fetched and cached.
    pub loaded: usize,
    /// Keys whose fetch failed and were left to the read-through path.
    pub skipped: usize,
}

/// Key-value cache of order aggregates.
#[async_trait]
pub trait OrderCache: Send + Sync {
    /// Return a copy of the cached aggregate, if present.
    fn get(&self, uid: &OrderUid) -> Option<Order>;

    /// Insert or replace the aggregate under its own key.
    fn set(&self, order: Order);

    /// Remove the entry for `uid`. Returns `true` if an entry was removed.
    fn delete(&self, uid: &OrderUid) -> bool;

    /// Snapshot of every cached key, in no particular order.
    fn list_keys(&self) -> Vec<OrderUid>;

    /// Number of cached aggregates.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Populate the cache from `store`.
    ///
    /// Best effort: a failed fetch for one key is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns the store error only if listing the keys fails.
    async fn load_from_store(&self, store: &dyn OrderStore) -> Result<WarmReport, RepositoryError>;
}

/// Process-local [`OrderCache`] over a `HashMap` behind an `RwLock`.
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<OrderUid, Order>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<OrderUid, Order>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<OrderUid, Order>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderCache for MemoryCache {
    fn get(&self, uid: &OrderUid) -> Option<Order> {
        let order = self.read().get(uid).cloned();
        debug!(order_uid = %uid, hit = order.is_some(), "Cache lookup");
        order
    }

    fn set(&self, order: Order) {
        let uid = order.order_uid.clone();
        self.write().insert(uid.clone(), order);
        debug!(order_uid = %uid, "Cache set");
    }

    fn delete(&self, uid: &OrderUid) -> bool {
        let removed = self.write().remove(uid).is_some();
        debug!(order_uid = %uid, removed, "Cache delete");
        removed
    }

    fn list_keys(&self) -> Vec<OrderUid> {
        self.read().keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.read().len()
    }

    async fn load_from_store(&self, store: &dyn OrderStore) -> Result<WarmReport, RepositoryError> {
        let keys = store
            .list_keys()
            .await
            .inspect_err(|e| error!(error = %e, "Failed to list order keys for cache warm"))?;

        let mut report = WarmReport {
            listed: keys.len(),
            ..WarmReport::default()
        };

        // Each fetch happens outside the lock; only the insert is exclusive.
        for uid in keys {
            match store.get_info(&uid).await {
                Ok(order) => {
                    self.set(order);
                    report.loaded += 1;
                }
                Err(e) => {
                    warn!(order_uid = %uid, error = %e, "Skipping order during cache warm");
                    report.skipped += 1;
                }
            }
        }

        info!(
            listed = report.listed,
            loaded = report.loaded,
            skipped = report.skipped,
            "Cache loaded from store"
        );
        Ok(report)
    }
}
