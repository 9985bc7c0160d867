//! In-memory pending-emission store for tests.

use super::{PendingEmission, TimerError, TimerStore};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use uuid::Uuid;

/// [`TimerStore`] backed by a `Mutex<Vec<_>>`.
///
/// Outlives any number of [`Scheduler`](super::Scheduler) instances, which
/// is what makes crash-recovery tests possible: drop the scheduler, keep the
/// store, start a new scheduler over it.
#[derive(Default)]
pub struct InMemoryTimerStore {
    records: Mutex<Vec<PendingEmission>>,
}

impl InMemoryTimerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records still pending. Test helper.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned, which only happens after
    /// another test thread panicked while holding it.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn pending(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl TimerStore for InMemoryTimerStore {
    fn schedule(
        &self,
        emission: PendingEmission,
    ) -> Pin<Box<dyn Future<Output = Result<(), TimerError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self
                .records
                .lock()
                .map_err(|e| TimerError::Backend(e.to_string()))?;
            records.push(emission);
            Ok(())
        })
    }

    fn due(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PendingEmission>, TimerError>> + Send + '_>> {
        Box::pin(async move {
            let records = self
                .records
                .lock()
                .map_err(|e| TimerError::Backend(e.to_string()))?;
            let mut due: Vec<PendingEmission> = records
                .iter()
                .filter(|r| r.due_at <= now)
                .cloned()
                .collect();
            due.sort_by_key(|r| r.due_at);
            Ok(due)
        })
    }

    fn complete(
        &self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<(), TimerError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self
                .records
                .lock()
                .map_err(|e| TimerError::Backend(e.to_string()))?;
            records.retain(|r| r.id != id);
            Ok(())
        })
    }
}
