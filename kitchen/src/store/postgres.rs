//! Postgres-backed kitchen store: one row per kitchen, descriptive fields
//! kept as an opaque JSONB document.

use super::{KitchenStore, StoreError};
use dishpatch_core::domain::Kitchen;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

/// [`KitchenStore`] over a `kitchens` table.
#[derive(Clone)]
pub struct PostgresKitchenStore {
    pool: PgPool,
}

impl PostgresKitchenStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist. Called once at
    /// service startup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS kitchens (
                kitchen_id TEXT PRIMARY KEY,
                details JSONB NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl KitchenStore for PostgresKitchenStore {
    fn insert_many(
        &self,
        kitchens: &[Kitchen],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let kitchens = kitchens.to_vec();
        Box::pin(async move {
            for kitchen in kitchens {
                let details = serde_json::Value::Object(kitchen.details.clone());
                sqlx::query(
                    r"
                    INSERT INTO kitchens (kitchen_id, details)
                    VALUES ($1, $2)
                    ON CONFLICT (kitchen_id) DO NOTHING
                    ",
                )
                .bind(&kitchen.kitchen_id)
                .bind(details)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Kitchen>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT kitchen_id, details FROM kitchens")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            rows.into_iter()
                .map(|row| {
                    let details: serde_json::Value = row
                        .try_get("details")
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                    let details = match details {
                        serde_json::Value::Object(map) => map,
                        other => {
                            return Err(StoreError::Backend(format!(
                                "kitchen details are not an object: {other}"
                            )))
                        }
                    };
                    Ok(Kitchen {
                        kitchen_id: row
                            .try_get("kitchen_id")
                            .map_err(|e| StoreError::Backend(e.to_string()))?,
                        details,
                    })
                })
                .collect()
        })
    }
}
