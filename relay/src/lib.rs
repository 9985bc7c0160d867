//! # Dishpatch Status Relay
//!
//! The terminal consumer of the dishpatch choreography: bridges the
//! asynchronous workflow back to synchronous callers by parking
//! `updateHttpResponse` payloads in an expiring Redis cache, keyed by the
//! caller's `requestId`. The caller polls the cache; the 3600 s TTL is the
//! only timeout in the whole system.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod redis_store;
pub mod service;

pub use config::Config;
pub use redis_store::RedisCorrelationStore;
pub use service::RelayService;
