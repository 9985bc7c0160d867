//! # Dishpatch Kitchen Service
//!
//! Owns the restaurant catalog and the simulated food-preparation phase of
//! the dishpatch choreography. Consumes the shared topic, schedules the
//! delayed `kitchenPreparingFood` / `kitchenFoodReady` announcements, and
//! serves the catalog operations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod service;
pub mod store;

pub use config::Config;
pub use service::KitchenService;
pub use store::{KitchenStore, StoreError};
