//! The relay consumer: the terminal hop of every request/response exchange.
//!
//! Watches the shared topic for `updateHttpResponse` and parks each response
//! in the correlation store under its `requestId`. Every other event type is
//! committed and silently dropped; this service exists only to bridge the
//! asynchronous workflow back to synchronous pollers.

use dishpatch_core::bus::BusConsumer;
use dishpatch_core::correlation::CorrelationStore;
use dishpatch_core::envelope::{event_types, Envelope, ResponseUpdate};
use std::sync::Arc;

/// The status relay service.
pub struct RelayService {
    store: Arc<dyn CorrelationStore>,
}

impl RelayService {
    /// Create a relay writing into `store`.
    pub fn new(store: Arc<dyn CorrelationStore>) -> Self {
        Self { store }
    }

    /// Consume until the subscription ends, committing every message.
    pub async fn run(&self, consumer: &mut dyn BusConsumer) {
        while let Some(received) = consumer.next().await {
            match received {
                Ok(delivery) => {
                    self.handle(&delivery.envelope).await;
                    if let Err(e) = consumer.commit(&delivery) {
                        tracing::warn!(
                            topic = %delivery.topic,
                            offset = delivery.offset,
                            error = %e,
                            "Commit failed, message may be redelivered"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropped undeliverable message");
                }
            }
        }
    }

    /// Park an `updateHttpResponse`; ignore everything else. A failed or
    /// malformed write is logged and swallowed - the caller just observes a
    /// missing key until the next response for the same request, if any.
    pub async fn handle(&self, envelope: &Envelope) {
        if envelope.event_type != event_types::UPDATE_HTTP_RESPONSE {
            tracing::trace!(event_type = %envelope.event_type, "Event not handled by this service");
            return;
        }

        let update: ResponseUpdate = match serde_json::from_value(envelope.payload.clone()) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed response update, dropped");
                return;
            }
        };

        if let Err(e) = self.store.put(&update.request_id, &update.message).await {
            tracing::error!(request_id = %update.request_id, error = %e, "Error parking response");
        }
    }
}
