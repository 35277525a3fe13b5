//! Bounded fan-out for registry calls
//!
//! Listing tags for every repository of a remote catalog is the one place the
//! engine fans out network calls. [`LimitedConcurrentRunner`] caps how many of
//! those calls are in flight, keeps results in input order and cancels the
//! outstanding calls as soon as one fails.

use crate::error::{ReplicationError, Result};
use futures::future::try_join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default number of concurrent calls against one registry
pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone)]
pub struct LimitedConcurrentRunner {
    limit: usize,
}

impl Default for LimitedConcurrentRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl LimitedConcurrentRunner {
    /// A limit of zero is treated as one
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Runs `op` for every input with at most `limit` calls in flight.
    ///
    /// Returns the outputs in input order, or the first error. Calls still
    /// pending when an error surfaces are dropped and never resumed.
    pub async fn run<I, T, F, Fut>(&self, inputs: Vec<I>, op: F) -> Result<Vec<T>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let futures = inputs.into_iter().map(|input| {
            let semaphore = Arc::clone(&semaphore);
            let call = op(input);
            async move {
                let _permit = semaphore.acquire().await.map_err(|e| {
                    ReplicationError::Internal(format!("failed to acquire fetch permit: {}", e))
                })?;
                call.await
            }
        });
        try_join_all(futures).await
    }
}
