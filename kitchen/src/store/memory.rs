//! In-memory kitchen store for tests, with injectable write failures.

use super::{KitchenStore, StoreError};
use dishpatch_core::domain::Kitchen;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// [`KitchenStore`] backed by a `Mutex<HashMap<_, _>>`.
#[derive(Default)]
pub struct InMemoryKitchenStore {
    kitchens: Mutex<HashMap<String, Kitchen>>,
    fail_inserts: AtomicBool,
}

impl InMemoryKitchenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail, for exercising the
    /// persistence-failure path.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of stored kitchens. Test helper.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a previous test panic.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn len(&self) -> usize {
        self.kitchens.lock().unwrap().len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KitchenStore for InMemoryKitchenStore {
    fn insert_many(
        &self,
        kitchens: &[Kitchen],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let kitchens = kitchens.to_vec();
        Box::pin(async move {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("injected insert failure".to_string()));
            }
            let mut stored = self
                .kitchens
                .lock()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            for kitchen in kitchens {
                stored.entry(kitchen.kitchen_id.clone()).or_insert(kitchen);
            }
            Ok(())
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Kitchen>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let stored = self
                .kitchens
                .lock()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(stored.values().cloned().collect())
        })
    }
}
