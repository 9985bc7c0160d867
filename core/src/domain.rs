//! Domain entities shared by the services and their tests.
//!
//! Each service is authoritative for exactly one entity (order service for
//! [`Order`], kitchen service for [`Kitchen`]); no entity is mutated by two
//! services, and cross-service effects always flow through new events, never
//! shared storage. The types live here because the event payloads and the
//! correlation responses that carry them are a shared contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order lifecycle status, totally ordered by workflow progress.
///
/// The ordering is load-bearing: status updates are a monotonic
/// `max(current, incoming)` compare-and-swap, so a duplicate or out-of-order
/// delivery can never move an order backward or append a duplicate history
/// entry. `Delivered` is terminal.
///
/// ```
/// use dishpatch_core::domain::OrderStatus;
///
/// assert!(OrderStatus::OrderValidated < OrderStatus::KitchenFoodReady);
/// assert_eq!(OrderStatus::from_wire("courierMatched"), Some(OrderStatus::CourierMatched));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Persisted, awaiting validation.
    #[serde(rename = "orderCreated")]
    OrderCreated,
    /// Validation passed.
    #[serde(rename = "orderValidated")]
    OrderValidated,
    /// The kitchen is preparing the food.
    #[serde(rename = "kitchenPreparingFood")]
    KitchenPreparingFood,
    /// The food is ready for pickup.
    #[serde(rename = "kitchenFoodReady")]
    KitchenFoodReady,
    /// A courier was matched.
    #[serde(rename = "courierMatched")]
    CourierMatched,
    /// The courier picked the order up.
    #[serde(rename = "courierPickedUp")]
    CourierPickedUp,
    /// Terminal.
    #[serde(rename = "delivered")]
    Delivered,
}

impl OrderStatus {
    /// All statuses in workflow order.
    pub const ALL: [Self; 7] = [
        Self::OrderCreated,
        Self::OrderValidated,
        Self::KitchenPreparingFood,
        Self::KitchenFoodReady,
        Self::CourierMatched,
        Self::CourierPickedUp,
        Self::Delivered,
    ];

    /// The wire name, identical to the event type that announces the status.
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::OrderCreated => "orderCreated",
            Self::OrderValidated => "orderValidated",
            Self::KitchenPreparingFood => "kitchenPreparingFood",
            Self::KitchenFoodReady => "kitchenFoodReady",
            Self::CourierMatched => "courierMatched",
            Self::CourierPickedUp => "courierPickedUp",
            Self::Delivered => "delivered",
        }
    }

    /// Parse a wire name. Returns `None` for anything else, so callers can
    /// treat unrecognized event types as "not a lifecycle event" rather than
    /// an error.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_wire() == name)
    }

    /// Numeric workflow rank, used by stores for the single-statement
    /// compare-and-swap.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn rank(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One entry of an order's append-only status history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    /// The status that was applied.
    pub status: OrderStatus,
    /// When the transition was applied.
    pub timestamp: DateTime<Utc>,
}

/// The order entity, owned by the order service.
///
/// Created on the first `orderRequested`, mutated only by status-transition
/// events, never deleted (the lifecycle ends at `delivered`). Serializes in
/// the caller-facing camelCase shape with internal fields already stripped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order identity.
    pub order_id: String,
    /// The ordering user. Eventual consistency only, no enforced reference.
    pub user_id: String,
    /// The kitchen preparing the order. No enforced reference.
    pub kitchen_id: String,
    /// Current status.
    pub status: OrderStatus,
    /// Append-only transition log: one entry per applied transition, never
    /// rewritten.
    pub status_history: Vec<StatusEntry>,
    /// What was ordered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dish: Option<String>,
    /// Order total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price: Option<f64>,
}

impl Order {
    /// Build a freshly requested order at [`OrderStatus::OrderCreated`] with
    /// its first history entry.
    #[must_use]
    pub fn create(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        kitchen_id: impl Into<String>,
        dish: Option<String>,
        total_price: Option<f64>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            kitchen_id: kitchen_id.into(),
            status: OrderStatus::OrderCreated,
            status_history: vec![StatusEntry {
                status: OrderStatus::OrderCreated,
                timestamp: at,
            }],
            dish,
            total_price,
        }
    }
}

/// A restaurant catalog entry, owned by the kitchen service.
///
/// Descriptive fields are opaque to the core; only the identity matters.
/// Created in bulk, read-only afterward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kitchen {
    /// Kitchen identity, generated (UUID v4) when the creating request did
    /// not carry one.
    pub kitchen_id: String,
    /// Opaque descriptive fields, passed through untouched.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}
