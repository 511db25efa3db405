//! Inbound order ingestion.
//!
//! [`IngestLoop`] runs as one sequential task: fetch a message, decode it,
//! hand it to the order service, commit its offset, repeat. There is never
//! more than one message in flight.
//!
//! # Commit policy
//!
//! The offset is committed after every message regardless of outcome:
//!
//! - decoded and stored: committed
//! - decoded but rejected by the service (duplicate, invalid, store down): committed
//! - not decodable: forwarded to the dead-letter publisher if one is set, then committed
//!
//! Delivery is therefore at-least-once up to the service call and at-most-once
//! after it. A failed commit is logged and the loop moves on; the broker will
//! redeliver from the last successful commit after a restart.
//!
//! # States
//!
//! ```text
//! Running --(shutdown observed)--> Draining --(iteration finished)--> Stopped
//! ```
//!
//! Shutdown is observed while waiting for a message or during a fetch backoff,
//! and between iterations. A message already being processed is finished and
//! committed first.

use std::sync::Arc;
use std::time::Duration;

use orderline_core::{Order, OrderUid};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{InboundMessage, MessageSource, Publisher};
use crate::services::{OrderService, OrderSource};

/// Default pause after a failed fetch.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Largest payload prefix written to the log for an undecodable message.
const PAYLOAD_LOG_LIMIT: usize = 512;

/// Lifecycle of an [`IngestLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Running,
    Draining,
    Stopped,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored and cached.
    Processed(OrderUid),
    /// Decoded, but the service refused or failed to store it.
    Rejected(OrderUid),
    /// Payload was not a valid order.
    Skipped,
}

/// Counters accumulated over the life of a loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub processed: u64,
    pub rejected: u64,
    pub skipped: u64,
    pub dead_lettered: u64,
    pub commit_failures: u64,
    pub fetch_errors: u64,
}

/// Pulls orders from a [`MessageSource`] into the [`OrderService`].
pub struct IngestLoop {
    source: Arc<dyn MessageSource>,
    service: OrderService,
    dead_letter: Option<Arc<dyn Publisher>>,
    backoff: Duration,
    shutdown: CancellationToken,
    state: watch::Sender<IngestState>,
}

impl IngestLoop {
    /// Create a loop that stops when `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        source: Arc<dyn MessageSource>,
        service: OrderService,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(IngestState::Running);
        Self {
            source,
            service,
            dead_letter: None,
            backoff: DEFAULT_RETRY_BACKOFF,
            shutdown,
            state,
        }
    }

    /// Pause for `backoff` after each failed fetch.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Forward undecodable payloads to `publisher` before skipping them.
    #[must_use]
    pub fn with_dead_letter(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.dead_letter = Some(publisher);
        self
    }

    /// Watch the loop's state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<IngestState> {
        self.state.subscribe()
    }

    /// Run until shutdown and return the accumulated counters.
    pub async fn run(self) -> IngestStats {
        info!(backoff = ?self.backoff, "Ingest loop started");
        let mut stats = IngestStats::default();

        loop {
            if self.shutdown.is_cancelled() {
                self.state.send_replace(IngestState::Draining);
                break;
            }

            let fetched = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    self.state.send_replace(IngestState::Draining);
                    break;
                }
                fetched = self.source.fetch() => fetched,
            };

            let message = match fetched {
                Ok(message) => message,
                Err(e) => {
                    stats.fetch_errors += 1;
                    error!(error = %e, backoff = ?self.backoff, "Failed to fetch message");
                    tokio::select! {
                        biased;
                        () = self.shutdown.cancelled() => {
                            self.state.send_replace(IngestState::Draining);
                            break;
                        }
                        () = tokio::time::sleep(self.backoff) => continue,
                    }
                }
            };

            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                key = %message.key_lossy(),
                "Received message"
            );

            let outcome = self.handle(&message, &mut stats).await;
            self.commit(&message, &mut stats).await;

            if let IngestOutcome::Processed(uid) = outcome {
                info!(order_uid = %uid, offset = message.offset, "Order ingested and committed");
            }
        }

        self.state.send_replace(IngestState::Stopped);
        info!(
            processed = stats.processed,
            rejected = stats.rejected,
            skipped = stats.skipped,
            dead_lettered = stats.dead_lettered,
            commit_failures = stats.commit_failures,
            fetch_errors = stats.fetch_errors,
            "Ingest loop stopped"
        );
        stats
    }

    async fn handle(&self, message: &InboundMessage, stats: &mut IngestStats) -> IngestOutcome {
        let order = match Order::from_json(&message.payload) {
            Ok(order) => order,
            Err(e) => {
                stats.skipped += 1;
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    payload = %payload_preview(&message.payload),
                    "Failed to decode order message, skipping"
                );
                if self.dead_letter(message).await {
                    stats.dead_lettered += 1;
                }
                return IngestOutcome::Skipped;
            }
        };

        let uid = order.order_uid.clone();
        match self.service.add(order, OrderSource::Stream).await {
            Ok(()) => {
                stats.processed += 1;
                IngestOutcome::Processed(uid)
            }
            Err(e) => {
                stats.rejected += 1;
                error!(
                    order_uid = %uid,
                    offset = message.offset,
                    error = %e,
                    "Failed to add order from message"
                );
                IngestOutcome::Rejected(uid)
            }
        }
    }

    /// Returns `true` if the payload was handed to the dead-letter publisher.
    async fn dead_letter(&self, message: &InboundMessage) -> bool {
        let Some(publisher) = &self.dead_letter else {
            return false;
        };

        let key = message.key.as_deref().unwrap_or_default();
        match publisher.publish(key, &message.payload).await {
            Ok(()) => {
                warn!(offset = message.offset, "Undecodable message sent to dead-letter topic");
                true
            }
            Err(e) => {
                error!(offset = message.offset, error = %e, "Failed to dead-letter message");
                false
            }
        }
    }

    async fn commit(&self, message: &InboundMessage, stats: &mut IngestStats) {
        if let Err(e) = self.source.commit(message).await {
            stats.commit_failures += 1;
            error!(
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Failed to commit offset"
            );
        }
    }
}

fn payload_preview(payload: &[u8]) -> String {
    let end = payload.len().min(PAYLOAD_LOG_LIMIT);
    String::from_utf8_lossy(payload.get(..end).unwrap_or_default()).into_owned()
}
