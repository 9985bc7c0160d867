//! In-memory order store for tests, with injectable write failures.

use super::{Advance, OrderStore, StoreError};
use chrono::{DateTime, Utc};
use dishpatch_core::domain::{Order, OrderStatus, StatusEntry};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// [`OrderStore`] backed by a `Mutex<HashMap<_, _>>`.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
    fail_inserts: AtomicBool,
}

impl InMemoryOrderStore {
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

    /// Direct read for assertions.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a previous test panic.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn snapshot(&self, order_id: &str) -> Option<Order> {
        self.orders.lock().unwrap().get(order_id).cloned()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn insert(
        &self,
        order: &Order,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let order = order.clone();
        Box::pin(async move {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("injected insert failure".to_string()));
            }
            let mut orders = self
                .orders
                .lock()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            orders.entry(order.order_id.clone()).or_insert(order);
            Ok(())
        })
    }

    fn advance(
        &self,
        order_id: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Advance, StoreError>> + Send + '_>> {
        let order_id = order_id.to_string();
        Box::pin(async move {
            let mut orders = self
                .orders
                .lock()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let Some(order) = orders.get_mut(&order_id) else {
                return Ok(Advance::NotFound);
            };
            if status <= order.status {
                return Ok(Advance::Stale {
                    current: order.status,
                });
            }
            order.status = status;
            order.status_history.push(StatusEntry {
                status,
                timestamp: at,
            });
            Ok(Advance::Applied)
        })
    }

    fn get(
        &self,
        order_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>> {
        let order_id = order_id.to_string();
        Box::pin(async move {
            let orders = self
                .orders
                .lock()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(orders.get(&order_id).cloned())
        })
    }

    fn list_for_user(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, StoreError>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let orders = self
                .orders
                .lock()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(orders
                .values()
                .filter(|o| o.user_id == user_id)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn order(id: &str, user: &str) -> Order {
        Order::create(id, user, "k1", Some("pizza".into()), Some(10.0), Utc::now())
    }

    #[tokio::test]
    async fn advance_applies_forward_transitions_only() {
        let store = InMemoryOrderStore::new();
        store.insert(&order("o1", "u1")).await.unwrap();

        let applied = store
            .advance("o1", OrderStatus::KitchenFoodReady, Utc::now())
            .await
            .unwrap();
        assert_eq!(applied, Advance::Applied);

        // Duplicate.
        let stale = store
            .advance("o1", OrderStatus::KitchenFoodReady, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            stale,
            Advance::Stale {
                current: OrderStatus::KitchenFoodReady
            }
        );

        // Backward.
        let backward = store
            .advance("o1", OrderStatus::OrderValidated, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            backward,
            Advance::Stale {
                current: OrderStatus::KitchenFoodReady
            }
        );

        let stored = store.snapshot("o1").unwrap();
        assert_eq!(stored.status, OrderStatus::KitchenFoodReady);
        assert_eq!(stored.status_history.len(), 2);
    }

    #[tokio::test]
    async fn advance_on_unknown_order_is_not_found() {
        let store = InMemoryOrderStore::new();
        let outcome = store
            .advance("missing", OrderStatus::Delivered, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, Advance::NotFound);
    }

    #[tokio::test]
    async fn reinsert_does_not_reset_progress() {
        let store = InMemoryOrderStore::new();
        store.insert(&order("o1", "u1")).await.unwrap();
        store
            .advance("o1", OrderStatus::Delivered, Utc::now())
            .await
            .unwrap();

        // Redelivered orderRequested.
        store.insert(&order("o1", "u1")).await.unwrap();
        assert_eq!(store.snapshot("o1").unwrap().status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn list_for_user_filters_by_user() {
        let store = InMemoryOrderStore::new();
        store.insert(&order("o1", "u1")).await.unwrap();
        store.insert(&order("o2", "u1")).await.unwrap();
        store.insert(&order("o3", "u2")).await.unwrap();

        let mine = store.list_for_user("u1").await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|o| o.user_id == "u1"));
    }
}
