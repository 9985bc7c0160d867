//! Bus client abstraction: publish/subscribe over the shared partitioned log.
//!
//! Every service process owns one [`BusClient`] and runs one consumer loop
//! over a [`BusConsumer`]. The contract is deliberately small:
//!
//! - [`BusClient::publish`] enqueues an envelope and returns without waiting
//!   for broker acknowledgment. Delivery is reported on a side channel (the
//!   implementation logs success or failure) and is **not** retried
//!   automatically - the absence of a retry is part of the contract.
//! - [`BusClient::subscribe`] returns a lazy, effectively infinite sequence
//!   of deliveries with auto-commit disabled.
//! - [`BusConsumer::commit`] is the caller's explicit acknowledgment. A crash
//!   between receipt and commit causes redelivery (at-least-once), never
//!   silent loss, so handlers must be idempotent or duplicate-tolerant.
//!
//! # Partitioning
//!
//! Two envelopes published with the same partition key land on the same
//! partition and are observed in publication order. Envelopes without a key
//! have no cross-producer ordering guarantee.
//!
//! # Implementations
//!
//! - `dishpatch-redpanda` - rdkafka-backed client for production
//! - `dishpatch-testing` - in-memory bus for tests
//!
//! # Dyn Compatibility
//!
//! The traits use explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so services can hold `Arc<dyn BusClient>` and swap the
//! implementation at construction time.

use crate::envelope::Envelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to serialize or enqueue an envelope for a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// A received message was not a valid envelope. The broker offset is
    /// acknowledged by the implementation; the caller just observes the
    /// error and moves on (no dead-letter path).
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Explicit offset acknowledgment failed. The message may be redelivered.
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Network or transport error while receiving.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// One message received from the bus, with enough position information for
/// an explicit [`BusConsumer::commit`].
#[derive(Clone, Debug)]
pub struct Delivery {
    /// The decoded envelope.
    pub envelope: Envelope,
    /// Topic the message arrived on.
    pub topic: String,
    /// Partition the message arrived on.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// A manual-commit subscription over one or more topics.
pub trait BusConsumer: Send {
    /// Receive the next message.
    ///
    /// Yields `Some(Ok(delivery))` for each decodable message,
    /// `Some(Err(..))` for transport errors and undecodable payloads, and
    /// `None` only when the subscription is closed. The sequence is lazy and
    /// effectively infinite against a live broker.
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<Delivery, BusError>>> + Send + '_>>;

    /// Acknowledge a delivery.
    ///
    /// Must be called by the consumer loop after a handler has dispatched its
    /// synchronous side effects. Committing guarantees "accepted for
    /// processing", not "fully applied": delayed follow-up work is persisted
    /// separately (see [`crate::scheduler`]) before the commit happens.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::CommitFailed`] if the offset could not be staged;
    /// the message may then be redelivered, which handlers must tolerate.
    fn commit(&self, delivery: &Delivery) -> Result<(), BusError>;
}

/// Publish/subscribe capability owned by each service process.
///
/// Constructed explicitly and injected into the consumer loop - there is no
/// process-global client, so tests substitute an in-memory bus.
pub trait BusClient: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// `partition_key` routes related envelopes to the same ordered
    /// partition; order events use the order id, request-only events pass
    /// `None`. The returned future resolves once the envelope is serialized
    /// and enqueued - it does **not** wait for broker acknowledgment, and a
    /// failed delivery is logged, not retried.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] on serialization failure or when
    /// the envelope cannot be enqueued (for example, the local queue is full).
    fn publish(
        &self,
        topic: &str,
        partition_key: Option<&str>,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to topics with auto-commit disabled.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the consumer could not be
    /// created or the subscription rejected.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusConsumer>, BusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_display_includes_topic() {
        let err = BusError::PublishFailed {
            topic: "orders".to_string(),
            reason: "queue full".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("orders"));
        assert!(text.contains("queue full"));
    }
}
