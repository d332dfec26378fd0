//! Shared test fixtures: a scriptable ingestion worker and small helpers.

#![allow(dead_code)] // not every test binary uses every fixture

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use spanrelay_daemon::BoxFuture;
use spanrelay_daemon::ingest::IngestWorker;

/// Scriptable ingestion worker that records lifecycle invocations.
///
/// `hang_serve` simulates a worker whose serve loop never reaches steady
/// state; `hang_shutdown` simulates a worker whose shutdown blocks forever.
#[derive(Debug, Default)]
pub struct MockIngestWorker {
    label: String,
    serve_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    hang_serve: bool,
    hang_shutdown: bool,
}

impl MockIngestWorker {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// The serve loop never returns, like a real transport loop.
    #[must_use]
    pub fn with_hanging_serve(mut self) -> Self {
        self.hang_serve = true;
        self
    }

    /// Shutdown blocks forever.
    #[must_use]
    pub fn with_hanging_shutdown(mut self) -> Self {
        self.hang_shutdown = true;
        self
    }

    pub fn serve_calls(&self) -> usize {
        self.serve_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

impl IngestWorker for MockIngestWorker {
    fn serve(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.serve_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_serve {
                std::future::pending::<()>().await;
            }
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_shutdown {
                std::future::pending::<()>().await;
            }
        })
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Polls `condition` every 10ms for up to 2 seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Asserts that connections to `addr` are (eventually) refused.
///
/// A just-aborted accept loop may still hold the socket for a moment, so
/// this retries before failing.
pub async fn assert_eventually_refused(addr: std::net::SocketAddr) {
    for _ in 0..100 {
        match tokio::net::TcpStream::connect(addr).await {
            Err(_) => return,
            Ok(stream) => {
                drop(stream);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
    panic!("connections to {addr} still accepted after stop");
}
