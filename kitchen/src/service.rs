//! The kitchen service consumer: simulated preparation delays and the
//! restaurant catalog.
//!
//! The preparation simulation is two hops of "wait, then announce": a
//! consumed `courierMatched` schedules `kitchenPreparingFood`, a consumed
//! `kitchenPreparingFood` schedules `kitchenFoodReady`. Each hop re-publishes
//! the triggering payload with its `simulatorConfig` untouched, so the
//! caller-chosen `kitchenSpeed` keeps applying downstream. The delays are
//! persisted before commit and survive a restart (see the core scheduler).

use crate::store::KitchenStore;
use dishpatch_core::bus::{BusClient, BusConsumer};
use dishpatch_core::domain::Kitchen;
use dishpatch_core::envelope::{
    event_types, CatalogQuery, Envelope, OrderMessage, ResponseUpdate, RestaurantBatch,
    SimulatorConfig,
};
use dishpatch_core::scheduler::{PendingEmission, TimerStore};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// The kitchen service: simulated preparation and the restaurant catalog.
pub struct KitchenService {
    bus: Arc<dyn BusClient>,
    store: Arc<dyn KitchenStore>,
    timers: Arc<dyn TimerStore>,
    topic: String,
}

impl KitchenService {
    /// Create a service publishing and scheduling onto `topic`.
    pub fn new(
        bus: Arc<dyn BusClient>,
        store: Arc<dyn KitchenStore>,
        timers: Arc<dyn TimerStore>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            store,
            timers,
            topic: topic.into(),
        }
    }

    /// Consume until the subscription ends, committing every message after
    /// its handler ran.
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

    /// Dispatch one envelope by event type.
    pub async fn handle(&self, envelope: &Envelope) {
        match envelope.event_type.as_str() {
            event_types::COURIER_MATCHED => {
                self.schedule_preparation_step(envelope, event_types::KITCHEN_PREPARING_FOOD)
                    .await;
            }
            event_types::KITCHEN_PREPARING_FOOD => {
                self.schedule_preparation_step(envelope, event_types::KITCHEN_FOOD_READY)
                    .await;
            }
            event_types::KITCHEN_NEW_SIMULATED_LIST_REQUEST => {
                self.on_new_simulated_list(envelope).await;
            }
            event_types::KITCHEN_RESTAURANTS_LIST => self.on_restaurants_list(envelope).await,
            other => {
                tracing::debug!(event_type = %other, "Event not handled by this service");
            }
        }
    }

    /// Durably schedule the next preparation announcement after the
    /// simulated delay. A `kitchenSpeed` of zero means "as fast as the
    /// scheduler polls", with no observable delay.
    async fn schedule_preparation_step(&self, envelope: &Envelope, next_event: &str) {
        let message: OrderMessage = match serde_json::from_value(envelope.payload.clone()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    event_type = %envelope.event_type,
                    error = %e,
                    "Malformed payload, dropped"
                );
                return;
            }
        };
        let Some(order_id) = message.order_id else {
            tracing::warn!(event_type = %envelope.event_type, "Missing orderId, dropped");
            return;
        };

        let delay_ms = envelope.kitchen_speed_ms();
        let next = Envelope::new(
            next_event,
            envelope.payload.clone(),
            envelope.simulator_config.clone(),
        );
        let emission =
            PendingEmission::after_ms(delay_ms, &self.topic, Some(order_id.clone()), next);

        match self.timers.schedule(emission).await {
            Ok(()) => tracing::debug!(
                order_id = %order_id,
                next_event = %next_event,
                delay_ms,
                "Preparation step scheduled"
            ),
            Err(e) => tracing::error!(
                order_id = %order_id,
                next_event = %next_event,
                error = %e,
                "Error scheduling preparation step"
            ),
        }
    }

    /// `kitchenNewSimulatedListRequest`: bulk-insert the simulated catalog,
    /// generating ids where the request did not provide any.
    async fn on_new_simulated_list(&self, envelope: &Envelope) {
        let batch: RestaurantBatch = match serde_json::from_value(envelope.payload.clone()) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed restaurant batch, dropped");
                return;
            }
        };

        let kitchens = assign_kitchen_ids(batch.restaurants);
        let status_message = match self.store.insert_many(&kitchens).await {
            Ok(()) => {
                tracing::info!(count = kitchens.len(), "Kitchen list saved");
                json!({"status": "kitchen list created"})
            }
            Err(e) => {
                tracing::error!(error = %e, "Error saving kitchen list");
                json!({"status": "Kitchen list failed saving in database"})
            }
        };
        self.respond(
            &batch.request_id,
            &status_message,
            envelope.simulator_config.clone(),
        )
        .await;
    }

    /// `kitchenRestaurantsList`: full catalog scan for the caller.
    async fn on_restaurants_list(&self, envelope: &Envelope) {
        let query: CatalogQuery = match serde_json::from_value(envelope.payload.clone()) {
            Ok(query) => query,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed catalog query, dropped");
                return;
            }
        };

        let message = match self.store.list().await {
            Ok(docs) => json!({"status": "success", "docs": docs}),
            Err(e) => {
                tracing::error!(error = %e, "Error getting restaurants");
                json!({"status": "error getting events"})
            }
        };
        self.respond(&query.request_id, &message, envelope.simulator_config.clone())
            .await;
    }

    /// Publish an `updateHttpResponse` for the caller polling on
    /// `request_id`.
    async fn respond(
        &self,
        request_id: &str,
        message: &serde_json::Value,
        simulator_config: Option<SimulatorConfig>,
    ) {
        let update = ResponseUpdate {
            request_id: request_id.to_string(),
            message: message.to_string(),
        };
        let payload = match serde_json::to_value(&update) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Error encoding response");
                return;
            }
        };

        let envelope = Envelope::new(event_types::UPDATE_HTTP_RESPONSE, payload, simulator_config);
        if let Err(e) = self.bus.publish(&self.topic, None, &envelope).await {
            tracing::error!(request_id = %request_id, error = %e, "Error producing response update");
        }
    }
}

/// Turn the opaque restaurant documents into [`Kitchen`] entities, keeping a
/// provided `kitchenId` and generating a v4 UUID otherwise. Entries that are
/// not JSON objects are dropped with a warning.
fn assign_kitchen_ids(restaurants: Vec<serde_json::Value>) -> Vec<Kitchen> {
    restaurants
        .into_iter()
        .filter_map(|restaurant| {
            let serde_json::Value::Object(mut details) = restaurant else {
                tracing::warn!("Restaurant entry is not an object, dropped");
                return None;
            };
            let kitchen_id = match details.remove("kitchenId") {
                Some(serde_json::Value::String(id)) => id,
                _ => Uuid::new_v4().to_string(),
            };
            Some(Kitchen {
                kitchen_id,
                details,
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn assign_kitchen_ids_generates_distinct_ids() {
        let kitchens = assign_kitchen_ids(vec![
            json!({"name": "Mama Mia"}),
            json!({"name": "Wok This Way"}),
        ]);
        assert_eq!(kitchens.len(), 2);
        assert_ne!(kitchens[0].kitchen_id, kitchens[1].kitchen_id);
        assert_eq!(kitchens[0].details["name"], json!("Mama Mia"));
    }

    #[test]
    fn assign_kitchen_ids_keeps_provided_ids() {
        let kitchens = assign_kitchen_ids(vec![json!({"kitchenId": "k1", "name": "Mama Mia"})]);
        assert_eq!(kitchens[0].kitchen_id, "k1");
        // The id lives in the field, not the opaque details.
        assert!(kitchens[0].details.get("kitchenId").is_none());
    }

    #[test]
    fn assign_kitchen_ids_drops_non_objects() {
        let kitchens = assign_kitchen_ids(vec![json!("just a string"), json!({"name": "Solo"})]);
        assert_eq!(kitchens.len(), 1);
    }
}
