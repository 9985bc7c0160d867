//! # Dishpatch Core
//!
//! Shared contracts for the dishpatch order-lifecycle choreography.
//!
//! Several independently deployed services (order, kitchen, status relay)
//! coordinate a food-delivery order by reacting to events on one shared,
//! partitioned topic. No service owns the whole workflow: each one consumes
//! the events it understands, persists its own state, and emits new events.
//! This crate holds everything those services agree on:
//!
//! - [`envelope`] - the `{eventType, payload, simulatorConfig}` JSON wire
//!   contract and the registry of event type names
//! - [`bus`] - the [`BusClient`](bus::BusClient) /
//!   [`BusConsumer`](bus::BusConsumer) capability with explicit, manual
//!   offset commits (at-least-once delivery)
//! - [`domain`] - the order and kitchen entities, including the totally
//!   ordered [`OrderStatus`](domain::OrderStatus) state machine
//! - [`correlation`] - the expiring key-value hand-off surface that lets a
//!   synchronous caller poll for the outcome of the asynchronous workflow
//! - [`scheduler`] - durable delayed emission: pending-emission records that
//!   survive a crash, driven by a restart-safe background task
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual commits: a service commits a message only
//! after its synchronous side effects are durably recorded, so a crash
//! between receipt and commit causes redelivery, never silent loss.
//! Consumers tolerate duplicates: every status transition is a monotonic
//! compare-and-swap (see [`domain::OrderStatus`]), not a delta that
//! compounds on replay.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod correlation;
pub mod domain;
pub mod envelope;
pub mod scheduler;

pub use bus::{BusClient, BusConsumer, BusError, Delivery};
pub use correlation::{CorrelationError, CorrelationStore, RESPONSE_TTL_SECS};
pub use domain::{Kitchen, Order, OrderStatus, StatusEntry};
pub use envelope::{Envelope, EnvelopeError, SimulatorConfig};
