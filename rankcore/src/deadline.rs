//! Caller-supplied deadlines for collaborator calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::errors::{Operation, StoreError, StoreResult};

/// Point in time by which an engine operation must finish.
///
/// A single deadline bounds every collaborator call an operation makes, so
/// later calls get whatever budget earlier calls left over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    /// Deadline at a fixed instant.
    pub const fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Runs `call` against a collaborator, failing with
    /// [`StoreError::Timeout`] if the deadline passes first.
    pub async fn run<T, F>(&self, operation: Operation, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        tokio::time::timeout_at(self.0, call)
            .await
            .unwrap_or(Err(StoreError::Timeout { operation }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn run_returns_call_result_within_budget() {
        let deadline = Deadline::after(Duration::from_millis(100));
        let result = deadline.run(Operation::GetItem, async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out_slow_calls() {
        let deadline = Deadline::after(Duration::from_millis(100));
        let result: StoreResult<()> = deadline
            .run(Operation::CacheGet, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(
            result,
            Err(StoreError::Timeout {
                operation: Operation::CacheGet
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_shrinks_to_zero() {
        let deadline = Deadline::after(Duration::from_secs(1));
        assert!(!deadline.is_expired());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
