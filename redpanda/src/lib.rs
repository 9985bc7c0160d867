//! Redpanda/Kafka implementation of the dishpatch bus client.
//!
//! This crate provides the production [`BusClient`] for the order
//! choreography. It uses rdkafka, so any Kafka-compatible broker works
//! (Redpanda, Apache Kafka, managed Kafka offerings).
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - `enable.auto.commit` is off; the consumer loop calls
//!   [`BusConsumer::commit`] after a handler has dispatched its synchronous
//!   side effects. A crash between receipt and commit causes redelivery,
//!   never silent loss.
//! - [`publish`](BusClient::publish) resolves once the envelope is enqueued
//!   on the producer. The broker's delivery report is awaited on a spawned
//!   task that logs partition/offset on success or the error on failure -
//!   a failed delivery is **not** retried.
//! - Ordering holds within a partition only: envelopes published with the
//!   same partition key (the order id) arrive in order; keyless envelopes
//!   have no cross-producer ordering.
//!
//! # Example
//!
//! ```no_run
//! use dishpatch_core::bus::{BusClient, BusConsumer};
//! use dishpatch_core::envelope::{event_types, Envelope};
//! use dishpatch_redpanda::RedpandaBusClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaBusClient::builder()
//!     .brokers("localhost:9092")
//!     .group_id("order-service")
//!     .build()?;
//!
//! let envelope = Envelope::new(
//!     event_types::ORDER_REQUESTED,
//!     serde_json::json!({"orderId": "o1", "userId": "u1", "kitchenId": "k1"}),
//!     None,
//! );
//! bus.publish("orders", Some("o1"), &envelope).await?;
//!
//! let mut consumer = bus.subscribe(&["orders"]).await?;
//! while let Some(result) = consumer.next().await {
//!     match result {
//!         Ok(delivery) => {
//!             // handle, then acknowledge
//!             consumer.commit(&delivery)?;
//!         }
//!         Err(e) => tracing::warn!(error = %e, "dropping undecodable message"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use dishpatch_core::bus::{BusClient, BusConsumer, BusError, Delivery};
use dishpatch_core::envelope::Envelope;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Kafka-compatible bus client.
///
/// Constructed once per service process and injected into the consumer loop
/// and the scheduler; nothing in this crate is a process-global.
pub struct RedpandaBusClient {
    /// Producer shared by direct publishes and scheduled emissions.
    producer: FutureProducer,
    /// Broker addresses, kept for creating consumers.
    brokers: String,
    /// Consumer group ID (if explicitly set).
    group_id: Option<String>,
    /// Where a new consumer group starts reading.
    auto_offset_reset: String,
}

impl RedpandaBusClient {
    /// Create a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created from the given broker list.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the client.
    #[must_use]
    pub fn builder() -> RedpandaBusClientBuilder {
        RedpandaBusClientBuilder::default()
    }

    /// The configured broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaBusClient`].
#[derive(Default)]
pub struct RedpandaBusClientBuilder {
    brokers: Option<String>,
    group_id: Option<String>,
    acks: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBusClientBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// Each service runs under its own group so every service sees every
    /// message on the shared topic. If not set, the group is generated from
    /// the subscribed topics.
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"` (every replica acknowledges before the delivery
    /// report fires).
    #[must_use]
    pub fn acks(mut self, acks: impl Into<String>) -> Self {
        self.acks = Some(acks.into());
        self
    }

    /// Set the producer message timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or
    /// `"latest"`.
    ///
    /// Default: `"earliest"`, so a freshly deployed service processes the
    /// events that accumulated before it joined.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBusClient, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.acks.unwrap_or_else(|| "all".to_string());

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set(
                "message.timeout.ms",
                timeout.as_millis().to_string(),
            )
            .set("acks", &acks)
            .set("log.connection.close", "false");

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks = %acks,
            group_id = self.group_id.as_deref().unwrap_or("<generated>"),
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBusClient created"
        );

        Ok(RedpandaBusClient {
            producer,
            brokers,
            group_id: self.group_id,
            auto_offset_reset,
        })
    }
}

impl BusClient for RedpandaBusClient {
    fn publish(
        &self,
        topic: &str,
        partition_key: Option<&str>,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = partition_key.map(ToString::to_string);
        let event_type = envelope.event_type.clone();
        let payload = envelope.to_bytes();

        Box::pin(async move {
            let payload = payload.map_err(|e| BusError::PublishFailed {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

            let mut record = FutureRecord::<String, Vec<u8>>::to(&topic).payload(&payload);
            if let Some(key) = &key {
                record = record.key(key);
            }

            // Enqueue only; the delivery report is observed on a side task.
            let delivery = match self.producer.send_result(record) {
                Ok(delivery) => delivery,
                Err((e, _record)) => {
                    tracing::error!(topic = %topic, error = %e, "Failed to enqueue envelope");
                    return Err(BusError::PublishFailed {
                        topic,
                        reason: e.to_string(),
                    });
                }
            };

            // Logged, never retried: at-least-once comes from consumer-side
            // redelivery, not from producer retries.
            tokio::spawn(async move {
                match delivery.await {
                    Ok(Ok((partition, offset))) => {
                        tracing::debug!(
                            topic = %topic,
                            partition = partition,
                            offset = offset,
                            event_type = %event_type,
                            "Envelope delivered"
                        );
                    }
                    Ok(Err((e, _message))) => {
                        tracing::error!(
                            topic = %topic,
                            event_type = %event_type,
                            error = %e,
                            "Delivery report: failed sending envelope"
                        );
                    }
                    Err(_cancelled) => {
                        tracing::error!(
                            topic = %topic,
                            event_type = %event_type,
                            "Delivery report channel dropped before resolution"
                        );
                    }
                }
            });

            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusConsumer>, BusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let group_id = self.group_id.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let group_id = group_id.unwrap_or_else(|| {
                let mut sorted = topics.clone();
                sorted.sort();
                format!("dishpatch-{}", sorted.join("-"))
            });

            // Manual commit: the consumer loop decides when a message is
            // acknowledged.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .set("log.connection.close", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                group_id = %group_id,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to topics"
            );

            Ok(Box::new(RedpandaConsumer { consumer }) as Box<dyn BusConsumer>)
        })
    }
}

/// Manual-commit consumer over a set of topics.
struct RedpandaConsumer {
    consumer: StreamConsumer,
}

impl BusConsumer for RedpandaConsumer {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<Delivery, BusError>>> + Send + '_>> {
        Box::pin(async move {
            match self.consumer.recv().await {
                Err(e) => Some(Err(BusError::Transport(format!(
                    "Failed to receive message: {e}"
                )))),
                Ok(message) => {
                    let topic = message.topic().to_string();
                    let partition = message.partition();
                    let offset = message.offset();

                    let decoded = message
                        .payload()
                        .ok_or_else(|| {
                            BusError::Deserialization("Message has no payload".to_string())
                        })
                        .and_then(|payload| {
                            Envelope::from_bytes(payload)
                                .map_err(|e| BusError::Deserialization(e.to_string()))
                        });

                    match decoded {
                        Ok(envelope) => {
                            tracing::trace!(
                                topic = %topic,
                                partition = partition,
                                offset = offset,
                                event_type = %envelope.event_type,
                                "Received envelope"
                            );
                            Some(Ok(Delivery {
                                envelope,
                                topic,
                                partition,
                                offset,
                            }))
                        }
                        Err(e) => {
                            // Undecodable messages are acknowledged here so
                            // they are not redelivered forever; the caller
                            // just observes the error (no dead-letter path).
                            if let Err(commit_err) =
                                self.consumer.commit_message(&message, CommitMode::Async)
                            {
                                tracing::warn!(
                                    topic = %topic,
                                    partition = partition,
                                    offset = offset,
                                    error = %commit_err,
                                    "Failed to commit undecodable message"
                                );
                            }
                            Some(Err(e))
                        }
                    }
                }
            }
        })
    }

    fn commit(&self, delivery: &Delivery) -> Result<(), BusError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(|e| BusError::CommitFailed(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BusError::CommitFailed(e.to_string()))
    }
}
