//! The order service consumer: dispatches shared-topic events to order
//! handlers and commits each message after its synchronous side effects.
//!
//! Handlers never return errors to the loop. Every failure path degrades to
//! "logged and swallowed", plus a best-effort correlation response when the
//! failure is caller-visible, and the message is committed either way. The
//! loop itself must outlive any single bad message.

use crate::store::{Advance, OrderStore};
use chrono::Utc;
use dishpatch_core::bus::{BusClient, BusConsumer};
use dishpatch_core::domain::{Order, OrderStatus};
use dishpatch_core::envelope::{
    event_types, Envelope, OrderMessage, ResponseUpdate, SimulatorConfig,
};
use dishpatch_core::scheduler::{PendingEmission, TimerStore};
use serde_json::json;
use std::sync::Arc;

/// Simulated validation delay between `orderCreated` and `orderValidated`,
/// in milliseconds. Fixed, unlike the kitchen delay, which callers can tune
/// through `simulatorConfig`.
pub const VALIDATION_DELAY_MS: u64 = 5000;

/// The order service: owns the order entity and its state machine.
pub struct OrderService {
    bus: Arc<dyn BusClient>,
    store: Arc<dyn OrderStore>,
    timers: Arc<dyn TimerStore>,
    topic: String,
}

impl OrderService {
    /// Create a service publishing and scheduling onto `topic`.
    pub fn new(
        bus: Arc<dyn BusClient>,
        store: Arc<dyn OrderStore>,
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
    /// its handler ran. Undecodable messages arrive already acknowledged by
    /// the bus and are just logged.
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
            event_types::ORDER_REQUESTED => self.on_order_requested(envelope).await,
            event_types::ORDER_CREATED => self.on_order_created(envelope).await,
            event_types::GET_ORDER_FROM_ID => self.on_get_order_from_id(envelope).await,
            event_types::GET_ORDERS_OF_USER => self.on_get_orders_of_user(envelope).await,
            other => {
                if let Some(status) = OrderStatus::from_wire(other) {
                    self.on_status_event(status, envelope).await;
                } else {
                    tracing::debug!(event_type = %other, "Event not handled by this service");
                }
            }
        }
    }

    /// `orderRequested`: persist the new order, ack the caller, emit
    /// `orderCreated`.
    async fn on_order_requested(&self, envelope: &Envelope) {
        let Some(message) = parse_order_message(envelope) else {
            return;
        };
        let (Some(order_id), Some(user_id), Some(kitchen_id)) =
            (message.order_id, message.user_id, message.kitchen_id)
        else {
            tracing::warn!("orderRequested missing orderId, userId or kitchenId, dropped");
            return;
        };

        let order = Order::create(
            &order_id,
            user_id,
            kitchen_id,
            message.dish,
            message.total_price,
            Utc::now(),
        );

        let status_message = match self.store.insert(&order).await {
            Ok(()) => {
                tracing::info!(order_id = %order_id, "Order saved");
                json!({"status": "orderCreated"})
            }
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "Error saving order");
                json!({"status": "Order failed saving in database"})
            }
        };
        self.respond(
            message.request_id.as_deref(),
            &status_message,
            envelope.simulator_config.clone(),
        )
        .await;

        // Emitted regardless of the insert outcome; the caller learns of a
        // failure through the correlation entry, and downstream services
        // tolerate events for orders that were never persisted.
        let created = Envelope::new(
            event_types::ORDER_CREATED,
            envelope.payload.clone(),
            envelope.simulator_config.clone(),
        );
        if let Err(e) = self.bus.publish(&self.topic, Some(&order_id), &created).await {
            tracing::error!(order_id = %order_id, error = %e, "Error producing orderCreated");
        } else {
            tracing::info!(order_id = %order_id, "orderCreated event produced");
        }
    }

    /// `orderCreated`: durably schedule the delayed `orderValidated`
    /// emission. The transition itself is applied when that event comes back
    /// through [`Self::on_status_event`].
    async fn on_order_created(&self, envelope: &Envelope) {
        let Some(message) = parse_order_message(envelope) else {
            return;
        };
        let Some(order_id) = message.order_id else {
            tracing::warn!("orderCreated without orderId, dropped");
            return;
        };

        let validated = Envelope::new(
            event_types::ORDER_VALIDATED,
            envelope.payload.clone(),
            envelope.simulator_config.clone(),
        );
        let emission = PendingEmission::after_ms(
            VALIDATION_DELAY_MS,
            &self.topic,
            Some(order_id.clone()),
            validated,
        );
        match self.timers.schedule(emission).await {
            Ok(()) => tracing::debug!(
                order_id = %order_id,
                delay_ms = VALIDATION_DELAY_MS,
                "Validation scheduled"
            ),
            Err(e) => tracing::error!(
                order_id = %order_id,
                error = %e,
                "Error scheduling validation"
            ),
        }
    }

    /// A lifecycle status event: apply the monotonic transition.
    async fn on_status_event(&self, status: OrderStatus, envelope: &Envelope) {
        let Some(message) = parse_order_message(envelope) else {
            return;
        };
        let Some(order_id) = message.order_id else {
            tracing::warn!(status = %status, "Status event without orderId, dropped");
            return;
        };

        match self.store.advance(&order_id, status, Utc::now()).await {
            Ok(Advance::Applied) => {
                tracing::info!(order_id = %order_id, status = %status, "Order status updated");
            }
            Ok(Advance::Stale { current }) => {
                tracing::warn!(
                    order_id = %order_id,
                    incoming = %status,
                    current = %current,
                    "Stale or duplicate status transition skipped"
                );
            }
            Ok(Advance::NotFound) => {
                tracing::warn!(order_id = %order_id, status = %status, "Status event for unknown order");
            }
            Err(e) => {
                tracing::error!(order_id = %order_id, status = %status, error = %e, "Error updating order status");
            }
        }
    }

    /// `getOrderFromId`: read one order and park the result for the caller.
    /// A missing order is a success with a null document, not an error.
    async fn on_get_order_from_id(&self, envelope: &Envelope) {
        let Some(message) = parse_order_message(envelope) else {
            return;
        };
        let Some(order_id) = message.order_id else {
            tracing::warn!("getOrderFromId without orderId, dropped");
            return;
        };

        let response = match self.store.get(&order_id).await {
            Ok(doc) => json!({"status": "success", "doc": doc}),
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "Error getting order");
                json!({"status": format!("error getting order of {order_id}")})
            }
        };
        self.respond(
            message.request_id.as_deref(),
            &response,
            envelope.simulator_config.clone(),
        )
        .await;
    }

    /// `getOrdersOfUser`: read all of a user's orders and park the result.
    async fn on_get_orders_of_user(&self, envelope: &Envelope) {
        let Some(message) = parse_order_message(envelope) else {
            return;
        };
        let Some(user_id) = message.user_id else {
            tracing::warn!("getOrdersOfUser without userId, dropped");
            return;
        };

        let response = match self.store.list_for_user(&user_id).await {
            Ok(docs) => json!({"status": "success", "docs": docs}),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Error getting orders");
                json!({"status": format!("error getting orders of user {user_id}")})
            }
        };
        self.respond(
            message.request_id.as_deref(),
            &response,
            envelope.simulator_config.clone(),
        )
        .await;
    }

    /// Publish an `updateHttpResponse` carrying `message` (serialized) for
    /// the caller polling on `request_id`. Without a request id there is
    /// nobody to answer.
    async fn respond(
        &self,
        request_id: Option<&str>,
        message: &serde_json::Value,
        simulator_config: Option<SimulatorConfig>,
    ) {
        let Some(request_id) = request_id else {
            tracing::debug!("No requestId to correlate a response to");
            return;
        };

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

/// Decode the order payload, tolerating missing fields. Only a payload that
/// is not an object at all fails, and that failure is logged and dropped.
fn parse_order_message(envelope: &Envelope) -> Option<OrderMessage> {
    match serde_json::from_value(envelope.payload.clone()) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(
                event_type = %envelope.event_type,
                error = %e,
                "Malformed payload, dropped"
            );
            None
        }
    }
}
