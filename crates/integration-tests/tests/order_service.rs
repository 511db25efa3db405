//! Order service behavior over in-memory fakes.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use orderline_core::{Order, OrderUid, OrderValidationError};
use orderline_integration_tests::{Harness, MemoryStore, order, order_with_items};
use orderline_server::cache::OrderCache;
use orderline_server::services::{OrderError, OrderSource};

fn uid(s: &str) -> OrderUid {
    OrderUid::new(s)
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_order_lifecycle() {
    let h = Harness::new();
    let original = order_with_items("UID1", 2);

    h.service.add(original.clone(), OrderSource::Api).await.unwrap();

    let fetched = h.service.get(&uid("UID1")).await.unwrap();
    assert_eq!(fetched, original);
    assert_eq!(fetched.items.len(), 2);

    let keys = h.service.list_keys().await.unwrap();
    assert!(keys.contains(&uid("UID1")));

    h.service.delete(&uid("UID1")).await.unwrap();

    let err = h.service.get(&uid("UID1")).await.unwrap_err();
    assert!(err.is_not_found());
    let keys = h.service.list_keys().await.unwrap();
    assert!(!keys.contains(&uid("UID1")));
}

#[tokio::test]
async fn test_add_then_get_is_deep_equal_from_store() {
    let h = Harness::new();
    let original = order_with_items("UID2", 5);
    h.service.add(original.clone(), OrderSource::Stream).await.unwrap();

    // Force the read through the store
    h.cache.delete(&uid("UID2"));
    let fetched = h.service.get(&uid("UID2")).await.unwrap();

    assert_eq!(fetched, original);
    assert_eq!(h.store.read_count(), 1);
}

#[tokio::test]
async fn test_order_without_items() {
    let h = Harness::new();
    let original = order_with_items("EMPTY", 0);
    h.service.add(original.clone(), OrderSource::Api).await.unwrap();

    let fetched = h.service.get(&uid("EMPTY")).await.unwrap();
    assert!(fetched.items.is_empty());
    assert_eq!(fetched, original);
}

// ============================================================================
// Add
// ============================================================================

#[tokio::test]
async fn test_readd_returns_already_exists_and_keeps_original() {
    let h = Harness::new();
    let original = order("DUP");
    h.service.add(original.clone(), OrderSource::Api).await.unwrap();

    let mut replacement = order("DUP");
    replacement.track_number = "CHANGED".to_string();
    let err = h
        .service
        .add(replacement, OrderSource::Api)
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::AlreadyExists(ref u) if *u == uid("DUP")));
    assert_eq!(h.store.stored("DUP"), Some(original.clone()));
    assert_eq!(h.cache.get(&uid("DUP")), Some(original));
}

#[tokio::test]
async fn test_invalid_order_touches_nothing() {
    let h = Harness::new();

    let mut mismatched = order("BAD");
    mismatched.payment.transaction = "OTHER".to_string();
    let err = h
        .service
        .add(mismatched, OrderSource::Api)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::Invalid(OrderValidationError::TransactionMismatch { .. })
    ));

    let err = h
        .service
        .add(Order::default(), OrderSource::Api)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::Invalid(OrderValidationError::EmptyUid)));

    assert!(h.store.is_empty());
    assert!(h.cache.is_empty());
    assert!(h.publisher.attempts().is_empty());
}

#[tokio::test]
async fn test_store_failure_leaves_cache_untouched() {
    let h = Harness::new();
    h.store.fail_adds(true);

    let err = h
        .service
        .add(order("DOWN"), OrderSource::Api)
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::Unavailable(_)));
    assert!(h.cache.get(&uid("DOWN")).is_none());
    assert!(h.publisher.attempts().is_empty());
}

// ============================================================================
// Publishing
// ============================================================================

#[tokio::test]
async fn test_api_add_publishes_order() {
    let h = Harness::new();
    let original = order("PUB");
    h.service.add(original.clone(), OrderSource::Api).await.unwrap();

    let attempts = h.publisher.attempts();
    assert_eq!(attempts.len(), 1);
    let (key, payload) = &attempts[0];
    assert_eq!(key.as_slice(), b"PUB");
    assert_eq!(Order::from_json(payload).unwrap(), original);
}

#[tokio::test]
async fn test_stream_add_is_not_republished() {
    let h = Harness::new();
    h.service.add(order("IN"), OrderSource::Stream).await.unwrap();

    assert!(h.publisher.attempts().is_empty());
    assert!(h.cache.get(&uid("IN")).is_some());
}

#[tokio::test]
async fn test_publish_failure_is_not_an_add_failure() {
    let h = Harness::new();
    h.publisher.set_failing(true);

    h.service.add(order("P1"), OrderSource::Api).await.unwrap();

    assert_eq!(h.publisher.keys(), vec!["P1".to_string()]);
    assert!(h.store.stored("P1").is_some());
    assert!(h.cache.get(&uid("P1")).is_some());
}

// ============================================================================
// Get
// ============================================================================

#[tokio::test]
async fn test_get_reads_through_once() {
    let h = Harness::with_store(MemoryStore::with_orders([order("COLD")]));

    h.service.get(&uid("COLD")).await.unwrap();
    h.service.get(&uid("COLD")).await.unwrap();

    assert_eq!(h.store.read_count(), 1);
    assert!(h.cache.get(&uid("COLD")).is_some());
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let h = Harness::new();
    let err = h.service.get(&uid("NOPE")).await.unwrap_err();
    assert!(matches!(err, OrderError::NotFound(ref u) if *u == uid("NOPE")));
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_get_store_failure_is_unavailable() {
    let h = Harness::with_store(MemoryStore::with_orders([order("X")]));
    h.store.fail_reads(true);

    let err = h.service.get(&uid("X")).await.unwrap_err();
    assert!(matches!(err, OrderError::Unavailable(_)));
    assert!(h.cache.is_empty());
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let h = Harness::new();
    let err = h.service.delete(&uid("GHOST")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_delete_store_failure_keeps_cache_entry() {
    let h = Harness::new();
    h.service.add(order("KEEP"), OrderSource::Api).await.unwrap();
    h.store.fail_deletes(true);

    let err = h.service.delete(&uid("KEEP")).await.unwrap_err();

    assert!(matches!(err, OrderError::Unavailable(_)));
    assert!(h.cache.get(&uid("KEEP")).is_some());
    assert!(h.store.stored("KEEP").is_some());
}

// ============================================================================
// List
// ============================================================================

#[tokio::test]
async fn test_list_keys_falls_back_to_store_when_cache_empty() {
    let h = Harness::with_store(MemoryStore::with_orders([order("A"), order("B")]));

    let keys = h.service.list_keys().await.unwrap();

    assert_eq!(keys, vec![uid("A"), uid("B")]);
}

#[tokio::test]
async fn test_list_keys_fallback_failure_is_unavailable() {
    let h = Harness::new();
    h.store.fail_listing(true);

    let err = h.service.list_keys().await.unwrap_err();
    assert!(matches!(err, OrderError::Unavailable(_)));
}

// ============================================================================
// Warm start
// ============================================================================

#[tokio::test]
async fn test_warm_cache_loads_everything() {
    let h = Harness::with_store(MemoryStore::with_orders([
        order("A"),
        order("B"),
        order("C"),
    ]));

    let report = h.service.warm_cache(Duration::from_secs(5)).await.unwrap();

    assert_eq!(report.loaded, 3);
    assert_eq!(h.cache.len(), 3);
}

#[tokio::test]
async fn test_delete_during_read_through_does_not_recache() {
    let h = Harness::with_store(MemoryStore::with_orders([order("RACE")]));
    h.store.slow_reads(Duration::from_millis(100));

    let reader = {
        let service = h.service.clone();
        tokio::spawn(async move { service.get(&uid("RACE")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.service.delete(&uid("RACE")).await.unwrap();

    // The read started before the delete, so it still returns the order
    assert_eq!(reader.await.unwrap().unwrap(), order("RACE"));
    assert!(h.cache.get(&uid("RACE")).is_none());
    assert!(h.service.get(&uid("RACE")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_warm_cache_deadline() {
    let h = Harness::with_store(MemoryStore::with_orders([
        order("A"),
        order("B"),
        order("C"),
    ]));
    h.store.slow_reads(Duration::from_millis(200));

    let err = h
        .service
        .warm_cache(Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::Timeout(d) if d == Duration::from_millis(50)));
    assert!(h.cache.len() < 3);
}

#[tokio::test]
async fn test_ping_reports_store_health() {
    let h = Harness::new();
    assert!(h.service.ping().await.is_ok());

    h.store.fail_ping(true);
    assert!(matches!(
        h.service.ping().await,
        Err(OrderError::Unavailable(_))
    ));
}
