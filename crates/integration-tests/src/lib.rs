//! Integration tests for Orderline.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory tests (no external services)
//! cargo test -p orderline-integration-tests
//!
//! # Including the PostgreSQL store tests
//! ORDERS_TEST_DATABASE_URL=postgres://... cargo test -p orderline-integration-tests -- --ignored
//! ```
//!
//! # Fakes
//!
//! - [`MemoryStore`] - `OrderStore` over a map, with per-operation failure injection
//! - [`RecordingPublisher`] - `Publisher` that records every message and can be made to fail
//! - [`ScriptedSource`] - `MessageSource` that replays a fixed script and records commits
//! - [`Harness`] - a wired `OrderService` over the fakes and a real `MemoryCache`
//!
//! Order builders ([`order`], [`order_with_items`]) produce valid aggregates.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use orderline_core::{DeliveryInfo, Item, Order, OrderUid, Payment};
use orderline_server::broker::{BrokerError, InboundMessage, MessageSource, Publisher};
use orderline_server::cache::MemoryCache;
use orderline_server::db::{OrderStore, RepositoryError};
use orderline_server::services::OrderService;
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable() -> RepositoryError {
    RepositoryError::Database(sqlx::Error::PoolTimedOut)
}

// ============================================================================
// Order builders
// ============================================================================

/// A complete, valid order with two items.
#[must_use]
pub fn order(uid: &str) -> Order {
    order_with_items(uid, 2)
}

/// A complete, valid order with `items` line items.
#[must_use]
pub fn order_with_items(uid: &str, items: usize) -> Order {
    let track_number = format!("WBILM{uid}");
    let items: Vec<Item> = (0..items)
        .map(|i| {
            let n = i64::try_from(i).unwrap_or_default();
            Item {
                chrt_id: 9_934_930 + n,
                track_number: track_number.clone(),
                price: 453 + n,
                rid: format!("ab4219087a764ae0btest-{i}"),
                name: format!("Mascaras {i}"),
                sale: 30,
                size: "0".to_string(),
                total_price: 317 + n,
                nm_id: 2_389_212 + n,
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            }
        })
        .collect();

    Order {
        order_uid: OrderUid::new(uid),
        track_number,
        entry: "WBIL".to_string(),
        delivery: DeliveryInfo {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: uid.to_string(),
            request_id: 0,
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817,
            payment_dt: 1_637_907_727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total: 317,
            custom_fee: 0,
        },
        items,
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shardkey: "9".to_string(),
        sm_id: 99,
        date_created: Utc
            .with_ymd_and_hms(2021, 11, 26, 6, 22, 19)
            .single()
            .unwrap_or_default(),
        oof_shard: "1".to_string(),
    }
}

/// An inbound message on partition 0 at `offset`.
#[must_use]
pub fn message(offset: i64, key: &str, payload: impl Into<Vec<u8>>) -> InboundMessage {
    InboundMessage {
        topic: "orders".to_string(),
        partition: 0,
        offset,
        key: Some(key.as_bytes().to_vec()),
        payload: payload.into(),
    }
}

/// An inbound message carrying `order` as JSON.
#[must_use]
pub fn order_message(offset: i64, order: &Order) -> InboundMessage {
    let payload = order.to_json().unwrap_or_default();
    message(offset, order.order_uid.as_str(), payload)
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Default)]
struct Failures {
    add: bool,
    reads: bool,
    read_keys: HashSet<OrderUid>,
    delete: bool,
    listing: bool,
    ping: bool,
    read_delay: Option<Duration>,
}

/// In-memory [`OrderStore`] with failure injection.
///
/// Keys are kept ordered so listings are deterministic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    orders: Mutex<BTreeMap<OrderUid, Order>>,
    failures: Mutex<Failures>,
    reads: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `orders`.
    #[must_use]
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let store = Self::new();
        lock(&store.orders).extend(orders.into_iter().map(|o| (o.order_uid.clone(), o)));
        store
    }

    /// Make every `add` fail with a database error.
    pub fn fail_adds(&self, fail: bool) {
        lock(&self.failures).add = fail;
    }

    /// Make every `get_info` fail with a database error.
    pub fn fail_reads(&self, fail: bool) {
        lock(&self.failures).reads = fail;
    }

    /// Make `get_info` fail for one key only.
    pub fn fail_read_of(&self, uid: &str) {
        lock(&self.failures).read_keys.insert(OrderUid::new(uid));
    }

    /// Make every `delete` fail with a database error.
    pub fn fail_deletes(&self, fail: bool) {
        lock(&self.failures).delete = fail;
    }

    /// Make `list_keys` fail with a database error.
    pub fn fail_listing(&self, fail: bool) {
        lock(&self.failures).listing = fail;
    }

    /// Make `ping` fail.
    pub fn fail_ping(&self, fail: bool) {
        lock(&self.failures).ping = fail;
    }

    /// Delay every `get_info` by `delay`. The read itself happens before the
    /// pause, so a slow read can return an order deleted in the meantime.
    pub fn slow_reads(&self, delay: Duration) {
        lock(&self.failures).read_delay = Some(delay);
    }

    /// The stored aggregate for `uid`, bypassing failure injection.
    #[must_use]
    pub fn stored(&self, uid: &str) -> Option<Order> {
        lock(&self.orders).get(uid).cloned()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.orders).len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `get_info` calls so far, failed ones included.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn add(&self, order: &Order) -> Result<(), RepositoryError> {
        if lock(&self.failures).add {
            return Err(unavailable());
        }

        let mut orders = lock(&self.orders);
        if orders.contains_key(&order.order_uid) {
            return Err(RepositoryError::Conflict(format!(
                "order {} already exists",
                order.order_uid
            )));
        }
        orders.insert(order.order_uid.clone(), order.clone());
        Ok(())
    }

    async fn get_info(&self, uid: &OrderUid) -> Result<Order, RepositoryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let (result, delay) = {
            let failures = lock(&self.failures);
            let result = if failures.reads || failures.read_keys.contains(uid) {
                Err(unavailable())
            } else {
                lock(&self.orders)
                    .get(uid)
                    .cloned()
                    .ok_or(RepositoryError::NotFound)
            };
            (result, failures.read_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn delete(&self, uid: &OrderUid) -> Result<(), RepositoryError> {
        if lock(&self.failures).delete {
            return Err(unavailable());
        }

        lock(&self.orders)
            .remove(uid)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_keys(&self) -> Result<Vec<OrderUid>, RepositoryError> {
        if lock(&self.failures).listing {
            return Err(unavailable());
        }
        Ok(lock(&self.orders).keys().cloned().collect())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        if lock(&self.failures).ping {
            return Err(unavailable());
        }
        Ok(())
    }
}

// ============================================================================
// RecordingPublisher
// ============================================================================

/// A published message: `(key, payload)`.
pub type Published = (Vec<u8>, Vec<u8>);

/// [`Publisher`] that records what it was asked to send.
///
/// Failed attempts are recorded as well.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    attempts: Mutex<Vec<Published>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    /// Create a publisher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that rejects everything.
    #[must_use]
    pub fn failing() -> Self {
        let publisher = Self::new();
        publisher.set_failing(true);
        publisher
    }

    /// Toggle failure mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every publish attempt, in order.
    #[must_use]
    pub fn attempts(&self) -> Vec<Published> {
        lock(&self.attempts).clone()
    }

    /// Keys of every publish attempt, as strings.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, key: &[u8], payload: &[u8]) -> Result<(), BrokerError> {
        lock(&self.attempts).push((key.to_vec(), payload.to_vec()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("broker unavailable".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// ScriptedSource
// ============================================================================

/// One scripted fetch result.
#[derive(Debug, Clone)]
pub enum Step {
    Message(InboundMessage),
    FetchError,
}

/// [`MessageSource`] that replays a fixed script.
///
/// Once the script is exhausted, `fetch` cancels the token given to
/// [`ScriptedSource::cancel_when_drained`] (if any) and then waits forever,
/// like a quiet topic.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    commits: Mutex<Vec<i64>>,
    failing_commits: Mutex<HashSet<i64>>,
    fetches: AtomicUsize,
    on_drained: Option<CancellationToken>,
}

impl ScriptedSource {
    /// Create a source replaying `steps` in order.
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Create a source replaying `messages` with no fetch errors.
    #[must_use]
    pub fn messages(messages: impl IntoIterator<Item = InboundMessage>) -> Self {
        Self::new(messages.into_iter().map(Step::Message))
    }

    /// Cancel `token` when the script runs out.
    #[must_use]
    pub fn cancel_when_drained(mut self, token: CancellationToken) -> Self {
        self.on_drained = Some(token);
        self
    }

    /// Fail the commit of the message at `offset`.
    pub fn fail_commit_at(&self, offset: i64) {
        lock(&self.failing_commits).insert(offset);
    }

    /// Offsets successfully committed, in order.
    #[must_use]
    pub fn committed(&self) -> Vec<i64> {
        lock(&self.commits).clone()
    }

    /// Number of `fetch` calls so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn fetch(&self) -> Result<InboundMessage, BrokerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let next = lock(&self.steps).pop_front();
        match next {
            Some(Step::Message(message)) => Ok(message),
            Some(Step::FetchError) => Err(BrokerError::Fetch("connection reset".to_string())),
            None => {
                if let Some(token) = &self.on_drained {
                    token.cancel();
                }
                std::future::pending().await
            }
        }
    }

    async fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        if lock(&self.failing_commits).contains(&message.offset) {
            return Err(BrokerError::Commit("coordinator not available".to_string()));
        }
        lock(&self.commits).push(message.offset);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// An `OrderService` over a [`MemoryStore`], a real [`MemoryCache`], and a
/// [`RecordingPublisher`], with handles to all three.
#[derive(Debug, Clone)]
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub publisher: Arc<RecordingPublisher>,
    pub service: OrderService,
}

impl Harness {
    /// Wire a service over an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Wire a service over `store`.
    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let cache = Arc::new(MemoryCache::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let service = OrderService::new(
            store.clone(),
            cache.clone(),
            Some(publisher.clone()),
        );

        Self {
            store,
            cache,
            publisher,
            service,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
