//! In-memory batch forwarder for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use spanrelay_core::span::SpanBatch;

use super::{BatchForwarder, ForwardError};
use crate::BoxFuture;

/// Collects forwarded batches in memory instead of shipping them anywhere.
///
/// `set_failing(true)` makes every subsequent `forward` call fail with
/// [`ForwardError::Closed`], simulating a collector outage.
#[derive(Debug, Default)]
pub struct MemoryBatchForwarder {
    batches: Mutex<Vec<SpanBatch>>,
    failing: AtomicBool,
}

impl MemoryBatchForwarder {
    /// Creates an empty forwarder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every batch forwarded so far.
    #[must_use]
    pub fn batches(&self) -> Vec<SpanBatch> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Returns the number of batches forwarded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing has been forwarded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Toggles failure mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl BatchForwarder for MemoryBatchForwarder {
    fn forward(&self, batch: SpanBatch) -> BoxFuture<'_, Result<(), ForwardError>> {
        Box::pin(async move {
            if self.failing.load(Ordering::Relaxed) {
                return Err(ForwardError::Closed);
            }
            if let Ok(mut batches) = self.batches.lock() {
                batches.push(batch);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_records_batches() {
        let forwarder = MemoryBatchForwarder::new();
        assert!(forwarder.is_empty());

        forwarder
            .forward(SpanBatch::new("checkout"))
            .await
            .expect("forward");
        assert_eq!(forwarder.len(), 1);
        assert_eq!(forwarder.batches()[0].service, "checkout");
    }

    #[tokio::test]
    async fn test_failure_mode() {
        let forwarder = MemoryBatchForwarder::new();
        forwarder.set_failing(true);
        let err = forwarder
            .forward(SpanBatch::new("checkout"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, ForwardError::Closed));
        assert!(forwarder.is_empty());

        forwarder.set_failing(false);
        forwarder
            .forward(SpanBatch::new("checkout"))
            .await
            .expect("forward after recovery");
        assert_eq!(forwarder.len(), 1);
    }
}
