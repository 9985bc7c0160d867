//! Postgres-backed order store.
//!
//! The order document is stored as columns plus a JSONB history array. The
//! monotonic transition is a single `UPDATE ... WHERE status_rank < $incoming`
//! statement: the row lock makes the compare-and-swap atomic, and a stale or
//! duplicate delivery simply matches zero rows.

use super::{Advance, OrderStore, StoreError};
use chrono::{DateTime, Utc};
use dishpatch_core::domain::{Order, OrderStatus, StatusEntry};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

/// [`OrderStore`] over an `orders` table.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table and index if they do not exist. Called once
    /// at service startup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kitchen_id TEXT NOT NULL,
                status TEXT NOT NULL,
                status_rank INT NOT NULL,
                status_history JSONB NOT NULL,
                dish TEXT,
                total_price DOUBLE PRECISION
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS orders_user_id_idx ON orders (user_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status_text: String = row
        .try_get("status")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let status = OrderStatus::from_wire(&status_text)
        .ok_or_else(|| StoreError::Backend(format!("unknown stored status '{status_text}'")))?;
    let history: serde_json::Value = row
        .try_get("status_history")
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let status_history: Vec<StatusEntry> =
        serde_json::from_value(history).map_err(|e| StoreError::Backend(e.to_string()))?;

    Ok(Order {
        order_id: row
            .try_get("order_id")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        kitchen_id: row
            .try_get("kitchen_id")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        status,
        status_history,
        dish: row
            .try_get("dish")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        total_price: row
            .try_get("total_price")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
    })
}

impl OrderStore for PostgresOrderStore {
    fn insert(
        &self,
        order: &Order,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let order = order.clone();
        Box::pin(async move {
            let history = serde_json::to_value(&order.status_history)
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            // ON CONFLICT DO NOTHING: a redelivered orderRequested must not
            // reset an order that has already progressed.
            sqlx::query(
                r"
                INSERT INTO orders
                    (order_id, user_id, kitchen_id, status, status_rank,
                     status_history, dish, total_price)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (order_id) DO NOTHING
                ",
            )
            .bind(&order.order_id)
            .bind(&order.user_id)
            .bind(&order.kitchen_id)
            .bind(order.status.as_wire())
            .bind(order.status.rank())
            .bind(history)
            .bind(&order.dish)
            .bind(order.total_price)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

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
            let entry = serde_json::to_value(StatusEntry {
                status,
                timestamp: at,
            })
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            let result = sqlx::query(
                r"
                UPDATE orders
                SET status = $2,
                    status_rank = $3,
                    status_history = status_history || $4::jsonb
                WHERE order_id = $1 AND status_rank < $3
                ",
            )
            .bind(&order_id)
            .bind(status.as_wire())
            .bind(status.rank())
            .bind(entry)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            if result.rows_affected() > 0 {
                return Ok(Advance::Applied);
            }

            // Zero rows: either the order does not exist or the stored
            // status is already at or past the incoming one.
            let row = sqlx::query("SELECT status FROM orders WHERE order_id = $1")
                .bind(&order_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            match row {
                None => Ok(Advance::NotFound),
                Some(row) => {
                    let current_text: String = row
                        .try_get("status")
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                    let current = OrderStatus::from_wire(&current_text).ok_or_else(|| {
                        StoreError::Backend(format!("unknown stored status '{current_text}'"))
                    })?;
                    Ok(Advance::Stale { current })
                }
            }
        })
    }

    fn get(
        &self,
        order_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>> {
        let order_id = order_id.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT order_id, user_id, kitchen_id, status,
                       status_history, dish, total_price
                FROM orders
                WHERE order_id = $1
                ",
            )
            .bind(&order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            row.as_ref().map(order_from_row).transpose()
        })
    }

    fn list_for_user(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, StoreError>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT order_id, user_id, kitchen_id, status,
                       status_history, dish, total_price
                FROM orders
                WHERE user_id = $1
                ",
            )
            .bind(&user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            rows.iter().map(order_from_row).collect()
        })
    }
}
