//! # Dishpatch Order Service
//!
//! Owns the order entity of the dishpatch choreography. Consumes the shared
//! topic, persists orders, applies monotonic status transitions, answers the
//! order queries, and schedules the delayed validation emission.
//!
//! The binary wires the Kafka bus, the Postgres stores and the scheduler
//! together; this library holds the service logic against the capability
//! traits so tests can run it entirely in memory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod service;
pub mod store;

pub use config::Config;
pub use service::{OrderService, VALIDATION_DELAY_MS};
pub use store::{Advance, OrderStore, StoreError};
