//! Redis-backed correlation store.
//!
//! One `SET key value EX 3600` per response; last write wins. The
//! [`ConnectionManager`] reconnects on its own, so a dropped connection
//! degrades to failed writes rather than a dead relay.

use dishpatch_core::correlation::{CorrelationError, CorrelationStore, RESPONSE_TTL_SECS};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::pin::Pin;

/// [`CorrelationStore`] over a Redis connection.
#[derive(Clone)]
pub struct RedisCorrelationStore {
    connection: ConnectionManager,
}

impl RedisCorrelationStore {
    /// Connect to Redis at `url` (for example `redis://localhost:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::ConnectionFailed`] if the URL is invalid
    /// or the initial connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, CorrelationError> {
        let client = redis::Client::open(url)
            .map_err(|e| CorrelationError::ConnectionFailed(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CorrelationError::ConnectionFailed(e.to_string()))?;
        Ok(Self { connection })
    }
}

impl CorrelationStore for RedisCorrelationStore {
    fn put(
        &self,
        request_id: &str,
        message: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CorrelationError>> + Send + '_>> {
        let mut connection = self.connection.clone();
        let request_id = request_id.to_string();
        let message = message.to_string();
        Box::pin(async move {
            let () = connection
                .set_ex(&request_id, &message, RESPONSE_TTL_SECS)
                .await
                .map_err(|e| CorrelationError::WriteFailed {
                    request_id: request_id.clone(),
                    reason: e.to_string(),
                })?;
            tracing::debug!(request_id = %request_id, "Response parked");
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const REDIS_URL: &str = "redis://localhost:6379";

    /// Requires a running Redis:
    /// `docker run -d -p 6379:6379 redis:7`
    #[tokio::test]
    #[ignore] // Requires Redis on localhost:6379
    async fn put_writes_value_with_ttl() {
        let store = RedisCorrelationStore::connect(REDIS_URL)
            .await
            .expect("redis should be reachable");

        let request_id = format!("relay-test-{}", uuid::Uuid::new_v4());
        store
            .put(&request_id, r#"{"status":"orderCreated"}"#)
            .await
            .expect("write should succeed");

        let client = redis::Client::open(REDIS_URL).unwrap();
        let mut connection = client.get_multiplexed_async_connection().await.unwrap();
        let stored: String = connection.get(&request_id).await.unwrap();
        assert_eq!(stored, r#"{"status":"orderCreated"}"#);

        let ttl: i64 = connection.ttl(&request_id).await.unwrap();
        assert!(ttl > 0 && ttl <= 3600, "ttl was {ttl}");

        let _: () = connection.del(&request_id).await.unwrap();
    }

    /// Requires a running Redis, see above.
    #[tokio::test]
    #[ignore] // Requires Redis on localhost:6379
    async fn last_write_wins() {
        let store = RedisCorrelationStore::connect(REDIS_URL)
            .await
            .expect("redis should be reachable");

        let request_id = format!("relay-test-{}", uuid::Uuid::new_v4());
        store.put(&request_id, "first").await.unwrap();
        store.put(&request_id, "second").await.unwrap();

        let client = redis::Client::open(REDIS_URL).unwrap();
        let mut connection = client.get_multiplexed_async_connection().await.unwrap();
        let stored: String = connection.get(&request_id).await.unwrap();
        assert_eq!(stored, "second");

        let _: () = connection.del(&request_id).await.unwrap();
    }
}
