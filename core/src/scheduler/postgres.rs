//! Postgres-backed pending-emission store.
//!
//! Each service keeps its pending emissions in its own database, next to the
//! entities it owns, so "handler persisted the record" and "handler
//! persisted the entity" share one durability story.

use super::{PendingEmission, TimerError, TimerStore};
use crate::envelope::Envelope;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// [`TimerStore`] over a `pending_emissions` table.
#[derive(Clone)]
pub struct PostgresTimerStore {
    pool: PgPool,
}

impl PostgresTimerStore {
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
    /// Returns [`TimerError::Backend`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), TimerError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS pending_emissions (
                id UUID PRIMARY KEY,
                due_at TIMESTAMPTZ NOT NULL,
                topic TEXT NOT NULL,
                partition_key TEXT,
                envelope JSONB NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TimerError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl TimerStore for PostgresTimerStore {
    fn schedule(
        &self,
        emission: PendingEmission,
    ) -> Pin<Box<dyn Future<Output = Result<(), TimerError>> + Send + '_>> {
        Box::pin(async move {
            let envelope = serde_json::to_value(&emission.envelope)
                .map_err(|e| TimerError::Backend(e.to_string()))?;

            sqlx::query(
                r"
                INSERT INTO pending_emissions (id, due_at, topic, partition_key, envelope)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(emission.id)
            .bind(emission.due_at)
            .bind(&emission.topic)
            .bind(&emission.partition_key)
            .bind(envelope)
            .execute(&self.pool)
            .await
            .map_err(|e| TimerError::Backend(e.to_string()))?;

            Ok(())
        })
    }

    fn due(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PendingEmission>, TimerError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, due_at, topic, partition_key, envelope
                FROM pending_emissions
                WHERE due_at <= $1
                ORDER BY due_at
                ",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TimerError::Backend(e.to_string()))?;

            rows.into_iter()
                .map(|row| {
                    let envelope: serde_json::Value = row
                        .try_get("envelope")
                        .map_err(|e| TimerError::Backend(e.to_string()))?;
                    let envelope: Envelope = serde_json::from_value(envelope)
                        .map_err(|e| TimerError::Backend(e.to_string()))?;
                    Ok(PendingEmission {
                        id: row
                            .try_get("id")
                            .map_err(|e| TimerError::Backend(e.to_string()))?,
                        due_at: row
                            .try_get("due_at")
                            .map_err(|e| TimerError::Backend(e.to_string()))?,
                        topic: row
                            .try_get("topic")
                            .map_err(|e| TimerError::Backend(e.to_string()))?,
                        partition_key: row
                            .try_get("partition_key")
                            .map_err(|e| TimerError::Backend(e.to_string()))?,
                        envelope,
                    })
                })
                .collect()
        })
    }

    fn complete(
        &self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<(), TimerError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM pending_emissions WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| TimerError::Backend(e.to_string()))?;
            Ok(())
        })
    }
}
