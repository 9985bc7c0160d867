//! Order persistence behind a capability trait.
//!
//! The store is the single serialization point of the order service: every
//! status transition funnels through [`OrderStore::advance`], a monotonic
//! `max(current, incoming)` compare-and-swap. There are no locks anywhere
//! else, so duplicate and out-of-order deliveries are resolved here, once,
//! regardless of the backing engine.

use chrono::{DateTime, Utc};
use dishpatch_core::domain::{Order, OrderStatus};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

#[cfg(feature = "test-utils")]
pub mod memory;
pub mod postgres;

/// Errors from the order store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The backing store failed.
    #[error("Order store error: {0}")]
    Backend(String),
}

/// Outcome of a status transition attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    /// The incoming status was ahead of the stored one; the order moved and
    /// one history entry was appended.
    Applied,
    /// The incoming status was a duplicate of, or behind, the stored one.
    /// Nothing changed: no status write, no history append.
    Stale {
        /// The status the order already holds.
        current: OrderStatus,
    },
    /// No order with that id exists.
    NotFound,
}

/// Persistence capability for the order entity.
pub trait OrderStore: Send + Sync {
    /// Insert a freshly created order. Inserting an id that already exists
    /// is a no-op, so a redelivered `orderRequested` cannot reset an order
    /// that has already progressed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the write failed.
    fn insert(
        &self,
        order: &Order,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Move an order to `status` if and only if `status` is strictly ahead
    /// of the stored one, appending one `{status, timestamp}` history entry.
    /// The comparison and the write happen atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the store could not be read or
    /// written.
    fn advance(
        &self,
        order_id: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Advance, StoreError>> + Send + '_>>;

    /// Read one order by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the store could not be read.
    fn get(
        &self,
        order_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>>;

    /// Read all orders of a user, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the store could not be read.
    fn list_for_user(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, StoreError>> + Send + '_>>;
}
