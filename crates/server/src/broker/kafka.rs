//! Kafka clients for the broker seams, on librdkafka.
//!
//! Offsets are never auto-committed; [`KafkaSource::commit`] is the only way
//! the consumer group's cursor moves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::{debug, info, instrument};

use super::{BrokerError, InboundMessage, MessageSource, Publisher};

/// Publishes keyed payloads to a single topic.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl std::fmt::Debug for KafkaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPublisher")
            .field("topic", &self.topic)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KafkaPublisher {
    /// Create a producer for `topic`.
    ///
    /// `timeout` bounds how long one publish waits for delivery, queueing
    /// included.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Config` if librdkafka rejects the configuration.
    pub fn new(brokers: &str, topic: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()
            .map_err(|e| BrokerError::Config(e.to_string()))?;

        info!(brokers, topic, "Kafka producer created");

        Ok(Self {
            producer,
            topic: topic.to_string(),
            timeout,
        })
    }

    /// Wait for queued messages to be delivered.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Publish` if the queue does not drain in time.
    pub async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    #[instrument(skip(self, key, payload), fields(topic = %self.topic, bytes = payload.len()))]
    async fn publish(&self, key: &[u8], payload: &[u8]) -> Result<(), BrokerError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok(_) => {
                debug!("Message delivered");
                Ok(())
            }
            Err((e, _)) => Err(BrokerError::Publish(e.to_string())),
        }
    }
}

/// Consumer-group member reading one topic with manual commits.
#[derive(Clone)]
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl std::fmt::Debug for KafkaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSource")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl KafkaSource {
    /// Join `group_id` and subscribe to `topic`.
    ///
    /// A group with no committed offset starts from the earliest message.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Config` if the consumer cannot be created or
    /// subscribed.
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BrokerError::Config(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Config(e.to_string()))?;

        info!(brokers, group_id, topic, "Kafka consumer subscribed");

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn fetch(&self) -> Result<InboundMessage, BrokerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Fetch(e.to_string()))?;

        Ok(InboundMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    /// Commit the offset after `message`, synchronously.
    async fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))
            .map_err(|e| BrokerError::Commit(e.to_string()))?;

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&positions, CommitMode::Sync))
            .await
            .map_err(|e| BrokerError::Commit(e.to_string()))?
            .map_err(|e| BrokerError::Commit(e.to_string()))
    }
}
