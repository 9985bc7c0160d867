//! Durable delayed emission.
//!
//! The workflow simulates processing time (order validation, kitchen
//! preparation) by emitting a follow-up event after a delay. An in-process
//! timer would silently drop the emission if the process crashed inside the
//! delay window, so the delay is made durable instead:
//!
//! 1. The handler persists a [`PendingEmission`] record through a
//!    [`TimerStore`] *before* the triggering message is committed - commit
//!    therefore means "accepted and durably scheduled".
//! 2. A [`Scheduler`] task polls for due records, publishes each through the
//!    injected [`BusClient`], and completes the record only after a
//!    successful publish. On restart it simply resumes from whatever records
//!    are still pending, recovering emissions that were in flight at crash
//!    time.
//!
//! There is no cancellation: once scheduled, an emission will eventually be
//! published. A zero delay is published on the scheduler's next tick.
//!
//! # Example
//!
//! ```
//! use dishpatch_core::scheduler::{memory::InMemoryTimerStore, PendingEmission, Scheduler, TimerStore};
//! use dishpatch_core::envelope::{event_types, Envelope};
//! use chrono::Utc;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(bus: Arc<dyn dishpatch_core::bus::BusClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let timers = Arc::new(InMemoryTimerStore::new());
//! let scheduler = Scheduler::new(timers.clone(), bus, Duration::from_millis(250));
//!
//! timers
//!     .schedule(PendingEmission::after_ms(
//!         0,
//!         "orders",
//!         Some("o1".to_string()),
//!         Envelope::new(event_types::KITCHEN_PREPARING_FOOD, serde_json::json!({"orderId": "o1"}), None),
//!     ))
//!     .await?;
//!
//! let published = scheduler.tick().await?;
//! assert_eq!(published, 1);
//! # Ok(())
//! # }
//! ```

use crate::bus::BusClient;
use crate::envelope::Envelope;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[cfg(feature = "test-utils")]
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// Errors from the pending-emission store.
#[derive(Error, Debug, Clone)]
pub enum TimerError {
    /// The backing store failed.
    #[error("Timer store error: {0}")]
    Backend(String),
}

/// A follow-up publication that must survive a process restart.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEmission {
    /// Record identity.
    pub id: Uuid,
    /// When the envelope becomes due for publication.
    pub due_at: DateTime<Utc>,
    /// Topic to publish on.
    pub topic: String,
    /// Partition key for the publication (the order id for order events).
    pub partition_key: Option<String>,
    /// The envelope to publish.
    pub envelope: Envelope,
}

impl PendingEmission {
    /// Schedule `envelope` for publication at `due_at`.
    #[must_use]
    pub fn new(
        due_at: DateTime<Utc>,
        topic: impl Into<String>,
        partition_key: Option<String>,
        envelope: Envelope,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            due_at,
            topic: topic.into(),
            partition_key,
            envelope,
        }
    }

    /// Schedule `envelope` for publication `delay_ms` milliseconds from now.
    #[must_use]
    pub fn after_ms(
        delay_ms: u64,
        topic: impl Into<String>,
        partition_key: Option<String>,
        envelope: Envelope,
    ) -> Self {
        let delay = ChronoDuration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX));
        Self::new(Utc::now() + delay, topic, partition_key, envelope)
    }
}

/// Persistence for pending emissions.
///
/// Implementations: Postgres (behind the `postgres` feature) for services,
/// [`memory::InMemoryTimerStore`] for tests.
pub trait TimerStore: Send + Sync {
    /// Durably record an emission. Called from handlers before the
    /// triggering message is committed.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Backend`] if the record could not be persisted;
    /// the handler treats that like any other persistence failure (logged
    /// and swallowed).
    fn schedule(
        &self,
        emission: PendingEmission,
    ) -> Pin<Box<dyn Future<Output = Result<(), TimerError>> + Send + '_>>;

    /// All records due at or before `now`, oldest first. Records stay
    /// pending until explicitly completed.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Backend`] if the store could not be read.
    fn due(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PendingEmission>, TimerError>> + Send + '_>>;

    /// Remove a record once its envelope has been published.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Backend`] if the record could not be removed;
    /// the emission may then be republished (at-least-once, like everything
    /// else here).
    fn complete(
        &self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<(), TimerError>> + Send + '_>>;
}

/// Restart-safe driver for pending emissions.
///
/// One scheduler runs per service process, sharing the process's bus client.
/// Delays for different orders overlap naturally: the scheduler is just a
/// poll loop, not a thread per timer.
pub struct Scheduler {
    timers: Arc<dyn TimerStore>,
    bus: Arc<dyn BusClient>,
    poll_interval: Duration,
}

impl Scheduler {
    /// Create a scheduler polling `timers` every `poll_interval`.
    #[must_use]
    pub fn new(timers: Arc<dyn TimerStore>, bus: Arc<dyn BusClient>, poll_interval: Duration) -> Self {
        Self {
            timers,
            bus,
            poll_interval,
        }
    }

    /// Publish everything currently due. Returns the number of emissions
    /// published.
    ///
    /// A record is completed only after its publish succeeded; a failed
    /// publish leaves the record pending for the next tick, preserving
    /// at-least-once semantics for scheduled emissions.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Backend`] if the due records could not be read.
    pub async fn tick(&self) -> Result<usize, TimerError> {
        let due = self.timers.due(Utc::now()).await?;
        let mut published = 0;

        for emission in due {
            let key = emission.partition_key.as_deref();
            match self.bus.publish(&emission.topic, key, &emission.envelope).await {
                Ok(()) => {
                    tracing::debug!(
                        emission_id = %emission.id,
                        topic = %emission.topic,
                        event_type = %emission.envelope.event_type,
                        "Published scheduled emission"
                    );
                    if let Err(e) = self.timers.complete(emission.id).await {
                        tracing::warn!(
                            emission_id = %emission.id,
                            error = %e,
                            "Failed to complete emission record (may be republished)"
                        );
                    }
                    published += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        emission_id = %emission.id,
                        topic = %emission.topic,
                        error = %e,
                        "Failed to publish scheduled emission, leaving pending"
                    );
                }
            }
        }

        Ok(published)
    }

    /// Run the poll loop forever. Spawn this alongside the service's
    /// consumer loop; on startup the first tick recovers any emissions left
    /// pending by a previous process.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Scheduler tick failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::memory::InMemoryTimerStore;
    use super::*;
    use crate::bus::{BusConsumer, BusError};
    use crate::envelope::event_types;
    use serde_json::json;
    use std::sync::Mutex;

    /// Captures publishes; optionally fails them all.
    struct RecordingBus {
        published: Mutex<Vec<(String, Option<String>, Envelope)>>,
        fail: bool,
    }

    impl RecordingBus {
        fn new(fail: bool) -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    impl BusClient for RecordingBus {
        fn publish(
            &self,
            topic: &str,
            partition_key: Option<&str>,
            envelope: &Envelope,
        ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
            let topic = topic.to_string();
            let key = partition_key.map(ToString::to_string);
            let envelope = envelope.clone();
            Box::pin(async move {
                if self.fail {
                    return Err(BusError::PublishFailed {
                        topic,
                        reason: "broker down".to_string(),
                    });
                }
                self.published.lock().unwrap().push((topic, key, envelope));
                Ok(())
            })
        }

        fn subscribe(
            &self,
            topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<Box<dyn BusConsumer>, BusError>> + Send + '_>> {
            let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
            Box::pin(async move {
                Err(BusError::SubscriptionFailed {
                    topics,
                    reason: "not supported in this test".to_string(),
                })
            })
        }
    }

    fn preparing_food(order_id: &str) -> Envelope {
        Envelope::new(
            event_types::KITCHEN_PREPARING_FOOD,
            json!({"orderId": order_id}),
            None,
        )
    }

    #[tokio::test]
    async fn due_emission_is_published_and_completed() {
        let timers = Arc::new(InMemoryTimerStore::new());
        let bus = Arc::new(RecordingBus::new(false));
        let scheduler = Scheduler::new(timers.clone(), bus.clone(), Duration::from_millis(10));

        timers
            .schedule(PendingEmission::after_ms(
                0,
                "orders",
                Some("o1".to_string()),
                preparing_food("o1"),
            ))
            .await
            .unwrap();

        assert_eq!(scheduler.tick().await.unwrap(), 1);

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "orders");
        assert_eq!(published[0].1.as_deref(), Some("o1"));

        // Completed: nothing due anymore.
        drop(published);
        assert_eq!(scheduler.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn future_emission_is_not_published_early() {
        let timers = Arc::new(InMemoryTimerStore::new());
        let bus = Arc::new(RecordingBus::new(false));
        let scheduler = Scheduler::new(timers.clone(), bus.clone(), Duration::from_millis(10));

        timers
            .schedule(PendingEmission::after_ms(
                60_000,
                "orders",
                Some("o1".to_string()),
                preparing_food("o1"),
            ))
            .await
            .unwrap();

        assert_eq!(scheduler.tick().await.unwrap(), 0);
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_publish_leaves_record_pending() {
        let timers = Arc::new(InMemoryTimerStore::new());
        let failing_bus = Arc::new(RecordingBus::new(true));
        let scheduler = Scheduler::new(timers.clone(), failing_bus, Duration::from_millis(10));

        timers
            .schedule(PendingEmission::after_ms(
                0,
                "orders",
                None,
                preparing_food("o1"),
            ))
            .await
            .unwrap();

        assert_eq!(scheduler.tick().await.unwrap(), 0);

        // A recovered scheduler with a healthy bus picks the record up.
        let bus = Arc::new(RecordingBus::new(false));
        let recovered = Scheduler::new(timers, bus.clone(), Duration::from_millis(10));
        assert_eq!(recovered.tick().await.unwrap(), 1);
        assert_eq!(bus.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restart_recovers_pending_emissions() {
        let timers = Arc::new(InMemoryTimerStore::new());

        // "Crash" after scheduling: the first process never ticks.
        timers
            .schedule(PendingEmission::after_ms(
                0,
                "orders",
                Some("o2".to_string()),
                preparing_food("o2"),
            ))
            .await
            .unwrap();

        // A fresh scheduler over the same store publishes it.
        let bus = Arc::new(RecordingBus::new(false));
        let scheduler = Scheduler::new(timers, bus.clone(), Duration::from_millis(10));
        assert_eq!(scheduler.tick().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn due_emissions_drain_oldest_first() {
        let timers = Arc::new(InMemoryTimerStore::new());
        let bus = Arc::new(RecordingBus::new(false));
        let scheduler = Scheduler::new(timers.clone(), bus.clone(), Duration::from_millis(10));

        let older = PendingEmission::new(
            Utc::now() - ChronoDuration::seconds(2),
            "orders",
            Some("o1".to_string()),
            preparing_food("o1"),
        );
        let newer = PendingEmission::new(
            Utc::now() - ChronoDuration::seconds(1),
            "orders",
            Some("o1".to_string()),
            preparing_food("o1-later"),
        );
        timers.schedule(newer).await.unwrap();
        timers.schedule(older).await.unwrap();

        assert_eq!(scheduler.tick().await.unwrap(), 2);
        let published = bus.published.lock().unwrap();
        assert_eq!(published[0].2.payload["orderId"], json!("o1"));
        assert_eq!(published[1].2.payload["orderId"], json!("o1-later"));
    }
}
