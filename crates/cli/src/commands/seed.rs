//! Publish random orders to the inbound topic.
//!
//! The running server picks them up through its ingest loop, so this
//! exercises the full stream path: broker, decode, store, cache.
//!
//! # Environment Variables
//!
//! - `KAFKA_BROKERS` - Bootstrap servers (default: localhost:9092)
//! - `KAFKA_INBOUND_TOPIC` - Topic to publish to (default: orders)
//! - `KAFKA_PUBLISH_TIMEOUT_MS` - Delivery timeout per message (default: 5000)

use std::time::Duration;

use orderline_server::broker::{KafkaPublisher, Publisher};
use orderline_server::config::KafkaConfig;
use rand::Rng;
use tracing::{info, warn};

use super::sample::random_order;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a seeding run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeedSummary {
    pub published: usize,
    pub failed: usize,
}

/// Publish `count` random orders. Each has `items` line items, or 1 to 3 if
/// `items` is `None`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the producer cannot
/// be created. Individual publish failures are counted, not returned.
pub async fn run(
    count: usize,
    items: Option<usize>,
) -> Result<SeedSummary, Box<dyn std::error::Error>> {
    let config = KafkaConfig::from_env()?;
    let publisher = KafkaPublisher::new(
        &config.brokers,
        &config.inbound_topic,
        config.publish_timeout,
    )?;

    info!(count, topic = %config.inbound_topic, "Seeding orders");

    let mut summary = SeedSummary::default();
    for _ in 0..count {
        // Generated per order so the non-Send RNG is not held across an await
        let (uid, payload) = {
            let mut rng = rand::rng();
            let item_count = items.unwrap_or_else(|| rng.random_range(1..=3));
            let order = random_order(&mut rng, item_count);
            (order.order_uid.clone(), order.to_json()?)
        };

        match publisher.publish(uid.as_bytes(), &payload).await {
            Ok(()) => summary.published += 1,
            Err(e) => {
                warn!(order_uid = %uid, error = %e, "Failed to publish seed order");
                summary.failed += 1;
            }
        }
    }

    publisher.flush(FLUSH_TIMEOUT).await?;

    info!(
        published = summary.published,
        failed = summary.failed,
        "Seeding complete"
    );
    Ok(summary)
}
