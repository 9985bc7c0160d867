//! # Dishpatch Testing
//!
//! In-memory doubles for the dishpatch infrastructure capabilities:
//!
//! - [`InMemoryBus`] - a [`BusClient`] over a retained in-process log,
//!   faithful to the broker semantics the services rely on: per-key
//!   partitioning with in-order delivery, explicit commits, resume from the
//!   committed offset, and undecodable payloads surfacing as deserialization
//!   errors that are acknowledged internally.
//! - [`InMemoryCorrelationStore`] - a [`CorrelationStore`] that tracks
//!   per-entry expiry deadlines so tests can assert TTL behavior without
//!   waiting an hour.
//!
//! One deliberate departure from a live broker: a consumer's `next()` returns
//! `None` once it has caught up with everything published so far, instead of
//! blocking for future traffic. A service loop driven by an [`InMemoryBus`]
//! therefore runs to completion when the log drains, which is exactly what a
//! scenario test wants. Events published *during* the loop (handlers
//! publishing follow-up events to the same topic) are still observed, so a
//! whole choreography can play out in-process.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, Utc};
use dishpatch_core::bus::{BusClient, BusConsumer, BusError, Delivery};
use dishpatch_core::correlation::{CorrelationError, CorrelationStore, RESPONSE_TTL_SECS};
use dishpatch_core::envelope::Envelope;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Number of partitions per in-memory topic. Small enough that a handful of
/// keys collide in tests, large enough to exercise per-partition offsets.
const PARTITIONS: i32 = 4;

struct StoredMessage {
    partition: i32,
    offset: i64,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct TopicLog {
    /// All messages in publication order, never removed.
    messages: Vec<StoredMessage>,
    /// Per-partition next offset to assign.
    next_offset: HashMap<i32, i64>,
    /// Per-partition committed position (offset of the next uncommitted
    /// message), shared by all consumers like a single consumer group.
    committed: HashMap<i32, i64>,
}

impl TopicLog {
    fn append(&mut self, partition: i32, bytes: Vec<u8>) {
        let offset = self.next_offset.entry(partition).or_insert(0);
        self.messages.push(StoredMessage {
            partition,
            offset: *offset,
            bytes,
        });
        *offset += 1;
    }
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, TopicLog>,
}

fn partition_for(key: Option<&str>) -> i32 {
    key.map_or(0, |key| {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let partition = (hasher.finish() % PARTITIONS as u64) as i32;
        partition
    })
}

/// In-memory [`BusClient`] with retained topics and manual commits.
///
/// Clones share the same log, so a test can hand one clone to the service
/// under test and keep another for publishing stimuli and asserting on
/// [`published`](Self::published) / [`committed`](Self::committed).
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes to a topic, bypassing envelope encoding. This is how
    /// tests inject undecodable payloads.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a previous test panic.
    #[allow(clippy::unwrap_used)]
    pub fn publish_raw(&self, topic: &str, partition_key: Option<&str>, bytes: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        let log = state.topics.entry(topic.to_string()).or_default();
        log.append(partition_for(partition_key), bytes);
    }

    /// Every decodable envelope published to `topic`, in publication order.
    /// Undecodable payloads injected via [`publish_raw`](Self::publish_raw)
    /// are skipped.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a previous test panic.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        let state = self.state.lock().unwrap();
        state.topics.get(topic).map_or_else(Vec::new, |log| {
            log.messages
                .iter()
                .filter_map(|m| Envelope::from_bytes(&m.bytes).ok())
                .collect()
        })
    }

    /// The committed position of `partition` on `topic`: the offset of the
    /// next message a fresh consumer would receive. `None` when nothing was
    /// ever committed there.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a previous test panic.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        let state = self.state.lock().unwrap();
        state
            .topics
            .get(topic)
            .and_then(|log| log.committed.get(&partition).copied())
    }
}

impl BusClient for InMemoryBus {
    fn publish(
        &self,
        topic: &str,
        partition_key: Option<&str>,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let partition = partition_for(partition_key);
        let bytes = envelope.to_bytes();
        Box::pin(async move {
            let bytes = bytes.map_err(|e| BusError::PublishFailed {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;
            let mut state = self
                .state
                .lock()
                .map_err(|e| BusError::Transport(e.to_string()))?;
            state.topics.entry(topic).or_default().append(partition, bytes);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusConsumer>, BusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let positions = topics.iter().map(|t| (t.clone(), 0)).collect();
            Ok(Box::new(InMemoryConsumer {
                state,
                topics,
                positions,
            }) as Box<dyn BusConsumer>)
        })
    }
}

/// Consumer over an [`InMemoryBus`]. Starts at the beginning of each topic
/// and skips messages already committed, mirroring a consumer group resuming
/// from its committed offsets.
struct InMemoryConsumer {
    state: Arc<Mutex<BusState>>,
    topics: Vec<String>,
    /// Per-topic read position into the retained message vector.
    positions: HashMap<String, usize>,
}

impl BusConsumer for InMemoryConsumer {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<Delivery, BusError>>> + Send + '_>> {
        Box::pin(async move {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(e) => return Some(Err(BusError::Transport(e.to_string()))),
            };

            for topic in &self.topics {
                let Some(log) = state.topics.get_mut(topic) else {
                    continue;
                };
                let Some(position) = self.positions.get_mut(topic) else {
                    continue;
                };

                while *position < log.messages.len() {
                    let index = *position;
                    *position += 1;

                    let committed = log
                        .committed
                        .get(&log.messages[index].partition)
                        .copied()
                        .unwrap_or(0);
                    if log.messages[index].offset < committed {
                        continue;
                    }

                    let (partition, offset) =
                        (log.messages[index].partition, log.messages[index].offset);
                    match Envelope::from_bytes(&log.messages[index].bytes) {
                        Ok(envelope) => {
                            return Some(Ok(Delivery {
                                envelope,
                                topic: topic.clone(),
                                partition,
                                offset,
                            }));
                        }
                        Err(e) => {
                            // Acknowledged internally, like the real consumer.
                            log.committed.insert(partition, offset + 1);
                            return Some(Err(BusError::Deserialization(e.to_string())));
                        }
                    }
                }
            }

            // Caught up with everything published so far.
            None
        })
    }

    fn commit(&self, delivery: &Delivery) -> Result<(), BusError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| BusError::CommitFailed(e.to_string()))?;
        let log = state.topics.entry(delivery.topic.clone()).or_default();
        log.committed.insert(delivery.partition, delivery.offset + 1);
        Ok(())
    }
}

struct StoredResponse {
    message: String,
    expires_at: DateTime<Utc>,
}

/// In-memory [`CorrelationStore`] with real expiry deadlines.
///
/// Entries carry the same TTL the Redis implementation applies; tests read
/// them back through [`get_at`](Self::get_at) with a chosen clock instead of
/// sleeping through the TTL.
#[derive(Clone, Default)]
pub struct InMemoryCorrelationStore {
    entries: Arc<Mutex<HashMap<String, StoredResponse>>>,
}

impl InMemoryCorrelationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored message for `request_id`, if present and unexpired now.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a previous test panic.
    #[must_use]
    pub fn get(&self, request_id: &str) -> Option<String> {
        self.get_at(request_id, Utc::now())
    }

    /// The stored message for `request_id` as observed at `at`: present
    /// before its expiry deadline, absent at or after it.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a previous test panic.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn get_at(&self, request_id: &str, at: DateTime<Utc>) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(request_id)
            .filter(|entry| at < entry.expires_at)
            .map(|entry| entry.message.clone())
    }

    /// Number of live (unexpired) entries.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a previous test panic.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn len(&self) -> usize {
        let now = Utc::now();
        let entries = self.entries.lock().unwrap();
        entries.values().filter(|e| now < e.expires_at).count()
    }

    /// Whether the store holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CorrelationStore for InMemoryCorrelationStore {
    fn put(
        &self,
        request_id: &str,
        message: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CorrelationError>> + Send + '_>> {
        let request_id = request_id.to_string();
        let message = message.to_string();
        Box::pin(async move {
            let mut entries = self
                .entries
                .lock()
                .map_err(|e| CorrelationError::ConnectionFailed(e.to_string()))?;
            #[allow(clippy::cast_possible_wrap)]
            let ttl = Duration::seconds(RESPONSE_TTL_SECS as i64);
            entries.insert(
                request_id,
                StoredResponse {
                    message,
                    expires_at: Utc::now() + ttl,
                },
            );
            Ok(())
        })
    }
}
