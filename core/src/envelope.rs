//! The event envelope: the wire format every message on the shared topic carries.
//!
//! Envelopes are UTF-8 JSON objects of the shape
//! `{"eventType": string, "payload": object, "simulatorConfig"?: object}`.
//! They are immutable once published. `eventType` selects the consumer-side
//! handler; `payload` is handler-specific. There is no schema version:
//! consumers must tolerate unknown fields and unknown event types (ignored,
//! not errors), because every service shares one topic and each only
//! understands a subset of the traffic.
//!
//! # Example
//!
//! ```
//! use dishpatch_core::envelope::{event_types, Envelope};
//! use serde_json::json;
//!
//! let envelope = Envelope::new(
//!     event_types::ORDER_REQUESTED,
//!     json!({"orderId": "o1", "userId": "u1", "kitchenId": "k1"}),
//!     None,
//! );
//!
//! let bytes = envelope.to_bytes().unwrap();
//! let decoded = Envelope::from_bytes(&bytes).unwrap();
//! assert_eq!(decoded.event_type, "orderRequested");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Simulated kitchen preparation delay when `simulatorConfig.kitchenSpeed`
/// is absent, in milliseconds.
pub const DEFAULT_KITCHEN_SPEED_MS: u64 = 5000;

/// The event type names carried on the shared topic.
///
/// These are exact wire strings; fan-out to the correct service is by
/// event type, not by topic.
pub mod event_types {
    /// An external caller asked for a new order.
    pub const ORDER_REQUESTED: &str = "orderRequested";
    /// The order document was persisted.
    pub const ORDER_CREATED: &str = "orderCreated";
    /// The order passed (simulated) validation.
    pub const ORDER_VALIDATED: &str = "orderValidated";
    /// The kitchen started preparing the food.
    pub const KITCHEN_PREPARING_FOOD: &str = "kitchenPreparingFood";
    /// The food is ready for pickup.
    pub const KITCHEN_FOOD_READY: &str = "kitchenFoodReady";
    /// A courier was matched to the order.
    pub const COURIER_MATCHED: &str = "courierMatched";
    /// The courier picked the order up.
    pub const COURIER_PICKED_UP: &str = "courierPickedUp";
    /// The order reached the customer. Terminal.
    pub const DELIVERED: &str = "delivered";
    /// Read-only query: a single order by id.
    pub const GET_ORDER_FROM_ID: &str = "getOrderFromId";
    /// Read-only query: all orders of a user.
    pub const GET_ORDERS_OF_USER: &str = "getOrdersOfUser";
    /// Bulk-create simulated restaurants.
    pub const KITCHEN_NEW_SIMULATED_LIST_REQUEST: &str = "kitchenNewSimulatedListRequest";
    /// Read-only query: the full restaurant catalog.
    pub const KITCHEN_RESTAURANTS_LIST: &str = "kitchenRestaurantsList";
    /// Park a response in the correlation store for a polling caller.
    pub const UPDATE_HTTP_RESPONSE: &str = "updateHttpResponse";
}

/// Errors produced while encoding or decoding an envelope.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The envelope could not be serialized to JSON.
    #[error("Failed to serialize envelope: {0}")]
    Serialization(String),

    /// The bytes were not a valid JSON envelope.
    #[error("Failed to deserialize envelope: {0}")]
    Deserialization(String),
}

/// Knobs for the workflow simulator, passed through unchanged from event to
/// event so downstream delays stay configured.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorConfig {
    /// Simulated kitchen preparation delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kitchen_speed: Option<u64>,

    /// Unknown simulator knobs are preserved, not dropped, so republishing
    /// an envelope keeps the caller's full configuration intact.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SimulatorConfig {
    /// The configured kitchen delay, falling back to
    /// [`DEFAULT_KITCHEN_SPEED_MS`].
    #[must_use]
    pub fn kitchen_speed_ms(&self) -> u64 {
        self.kitchen_speed.unwrap_or(DEFAULT_KITCHEN_SPEED_MS)
    }
}

/// The message wrapper carried on the shared topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Selects the consumer-side handler (see [`event_types`]).
    pub event_type: String,

    /// Handler-specific payload. Kept as raw JSON so unknown event types can
    /// carry shapes this crate has never heard of.
    pub payload: serde_json::Value,

    /// Optional simulator configuration, omitted from the wire when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulator_config: Option<SimulatorConfig>,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        simulator_config: Option<SimulatorConfig>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            simulator_config,
        }
    }

    /// Serialize to the UTF-8 JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] if the payload cannot be
    /// rendered as JSON (practically unreachable for `serde_json::Value`).
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }

    /// Deserialize from the UTF-8 JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Deserialization`] for non-JSON bytes or JSON
    /// missing the required `eventType`/`payload` members.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Deserialization(e.to_string()))
    }

    /// The effective kitchen delay for this message, honoring
    /// `simulatorConfig.kitchenSpeed` and defaulting to
    /// [`DEFAULT_KITCHEN_SPEED_MS`].
    #[must_use]
    pub fn kitchen_speed_ms(&self) -> u64 {
        self.simulator_config
            .as_ref()
            .map_or(DEFAULT_KITCHEN_SPEED_MS, SimulatorConfig::kitchen_speed_ms)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope {{ eventType: {} }}", self.event_type)
    }
}

/// Payload of every order-lifecycle event and order query.
///
/// The same payload travels through the whole lifecycle (the creating request
/// is republished by each derived event), so every field is optional and each
/// handler validates what it actually needs. Unknown fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMessage {
    /// The order identity. Also the partition key of order events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// The ordering user. Not an enforced foreign key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The kitchen preparing the order. Not an enforced foreign key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kitchen_id: Option<String>,
    /// Correlation id of the caller polling for the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// What was ordered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dish: Option<String>,
    /// Order total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price: Option<f64>,
}

/// Payload of `updateHttpResponse`: hand `message` to the caller polling by
/// `requestId`. `message` is a pre-serialized JSON string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseUpdate {
    /// Correlation key the caller polls on.
    pub request_id: String,
    /// The serialized response payload, written as-is.
    pub message: String,
}

/// Payload of `kitchenNewSimulatedListRequest`: restaurants to bulk-insert.
///
/// Restaurant documents are opaque to the core except for `kitchenId`, which
/// is generated when absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantBatch {
    /// Correlation key the caller polls on.
    pub request_id: String,
    /// Opaque restaurant documents.
    #[serde(default)]
    pub restaurants: Vec<serde_json::Value>,
}

/// Payload of `kitchenRestaurantsList`: a full catalog scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogQuery {
    /// Correlation key the caller polls on.
    pub request_id: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_format_is_camel_case_json() {
        let envelope = Envelope::new(
            event_types::ORDER_REQUESTED,
            json!({"orderId": "o1"}),
            Some(SimulatorConfig {
                kitchen_speed: Some(250),
                extra: serde_json::Map::new(),
            }),
        );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "eventType": "orderRequested",
                "payload": {"orderId": "o1"},
                "simulatorConfig": {"kitchenSpeed": 250},
            })
        );
    }

    #[test]
    fn simulator_config_is_omitted_when_absent() {
        let envelope = Envelope::new(event_types::DELIVERED, json!({}), None);
        let text = serde_json::to_string(&envelope).unwrap();
        assert!(!text.contains("simulatorConfig"));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let bytes = br#"{
            "eventType": "orderRequested",
            "payload": {"orderId": "o1", "futureField": true},
            "simulatorConfig": {"kitchenSpeed": 100, "courierSpeed": 7},
            "schemaHint": "ignored"
        }"#;

        let envelope = Envelope::from_bytes(bytes).unwrap();
        assert_eq!(envelope.event_type, "orderRequested");
        assert_eq!(envelope.kitchen_speed_ms(), 100);
        // Unknown simulator knobs survive a republish.
        let config = envelope.simulator_config.unwrap();
        assert_eq!(config.extra.get("courierSpeed"), Some(&json!(7)));
    }

    #[test]
    fn kitchen_speed_defaults_to_5000() {
        let envelope = Envelope::new(event_types::COURIER_MATCHED, json!({}), None);
        assert_eq!(envelope.kitchen_speed_ms(), DEFAULT_KITCHEN_SPEED_MS);

        let with_empty_config = Envelope::new(
            event_types::COURIER_MATCHED,
            json!({}),
            Some(SimulatorConfig::default()),
        );
        assert_eq!(with_empty_config.kitchen_speed_ms(), 5000);
    }

    #[test]
    fn malformed_bytes_are_a_deserialization_error() {
        let result = Envelope::from_bytes(b"this is not json");
        assert!(matches!(result, Err(EnvelopeError::Deserialization(_))));
    }

    #[test]
    fn order_message_reads_partial_payloads() {
        // getOrdersOfUser carries only userId + requestId.
        let payload = json!({"userId": "u1", "requestId": "r1"});
        let message: OrderMessage = serde_json::from_value(payload).unwrap();
        assert_eq!(message.user_id.as_deref(), Some("u1"));
        assert_eq!(message.order_id, None);
    }
}
