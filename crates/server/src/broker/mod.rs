//! Message broker seams.
//!
//! - [`Publisher`] sends a keyed payload to an outbound topic
//! - [`MessageSource`] hands out inbound messages and commits their offsets
//! - [`ingest`] drives a source through the order service
//! - `kafka` (feature `kafka`) implements both traits on librdkafka
//!
//! The wire contract is the same in both directions: the message key is the
//! raw order key and the value is the JSON order aggregate.

pub mod ingest;
#[cfg(feature = "kafka")]
pub mod kafka;

use async_trait::async_trait;
use thiserror::Error;

pub use ingest::{IngestLoop, IngestOutcome, IngestState, IngestStats};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaPublisher, KafkaSource};

/// Errors reported by broker clients.
///
/// All variants are transient from the caller's point of view: the ingest
/// loop backs off on fetch errors and the service logs publish errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Fetching the next inbound message failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Committing an inbound offset failed.
    #[error("commit failed: {0}")]
    Commit(String),

    /// Delivering an outbound message failed or timed out.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Broker client could not be created.
    #[error("client configuration error: {0}")]
    Config(String),
}

/// An inbound message, detached from the client that fetched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Message key as UTF-8, lossy, for logging.
    #[must_use]
    pub fn key_lossy(&self) -> String {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default()
    }
}

/// Outbound delivery of keyed payloads.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send one message and wait for the broker's acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Publish` if delivery fails or times out.
    async fn publish(&self, key: &[u8], payload: &[u8]) -> Result<(), BrokerError>;
}

/// Inbound stream with an explicit commit cursor.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message.
    ///
    /// Must be cancel-safe: the ingest loop drops this future on shutdown.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Fetch` on a transport failure.
    async fn fetch(&self) -> Result<InboundMessage, BrokerError>;

    /// Mark `message` (and everything before it on its partition) as processed.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Commit` if the commit is not acknowledged.
    async fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError>;
}
