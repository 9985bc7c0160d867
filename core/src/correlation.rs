//! Correlation store: the hand-off surface between the asynchronous workflow
//! and synchronous callers.
//!
//! A caller that triggered the workflow (for example, an HTTP gateway) polls
//! an expiring key-value cache by `requestId` until a response appears or the
//! entry expires. This core only ever **writes** entries - reading them back
//! is the external poller's job. A write may be overwritten by a later
//! response for the same request (for example, a creation ack followed by a
//! created-event ack); last write wins.
//!
//! An entry expiring before the caller polls must be treated by the caller as
//! "unknown / possibly never answered", not "failed" - the TTL is the only
//! timeout in the whole system.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Time-to-live of every correlation entry, in seconds.
pub const RESPONSE_TTL_SECS: u64 = 3600;

/// Errors that can occur while writing a correlation entry.
#[derive(Error, Debug, Clone)]
pub enum CorrelationError {
    /// Could not connect to the backing cache.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The write itself failed.
    #[error("Failed to store response for request '{request_id}': {reason}")]
    WriteFailed {
        /// The correlation key that failed.
        request_id: String,
        /// The reason for failure.
        reason: String,
    },
}

/// Expiring key-value store keyed by the caller's `requestId`.
///
/// Semantics of [`put`](CorrelationStore::put): `SET requestId value EX 3600`,
/// last write wins. Implementations: Redis in `dishpatch-relay`, in-memory in
/// `dishpatch-testing`.
pub trait CorrelationStore: Send + Sync {
    /// Park `message` (a pre-serialized response payload) under `request_id`
    /// with a [`RESPONSE_TTL_SECS`] expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::WriteFailed`] if the entry could not be
    /// written; the relay logs and swallows this (the caller simply observes
    /// a missing key).
    fn put(
        &self,
        request_id: &str,
        message: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CorrelationError>> + Send + '_>>;
}
