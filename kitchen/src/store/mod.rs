//! Restaurant catalog persistence behind a capability trait.
//!
//! Kitchens are created in bulk by the simulator and read-only afterward, so
//! the surface is just an insert-many and a full scan.

use dishpatch_core::domain::Kitchen;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

#[cfg(feature = "test-utils")]
pub mod memory;
pub mod postgres;

/// Errors from the kitchen store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The backing store failed.
    #[error("Kitchen store error: {0}")]
    Backend(String),
}

/// Persistence capability for the restaurant catalog.
pub trait KitchenStore: Send + Sync {
    /// Insert a batch of kitchens. Ids are already assigned by the caller;
    /// re-inserting an existing id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the write failed.
    fn insert_many(
        &self,
        kitchens: &[Kitchen],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// The full catalog, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the store could not be read.
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Kitchen>, StoreError>> + Send + '_>>;
}
