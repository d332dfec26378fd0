//! Ingestion worker capability surface.
//!
//! An ingestion worker is a concurrently running unit that accepts incoming
//! telemetry over its own transport and hands it onward. The orchestrator
//! treats workers as opaque: it spawns [`serve`](IngestWorker::serve) at
//! startup and [`shutdown`](IngestWorker::shutdown) at teardown and never
//! inspects their internal state.

use crate::BoxFuture;

pub mod udp;

pub use udp::{IngestStatsSnapshot, UdpIngestConfig, UdpIngestWorker};

/// Trait for ingestion workers.
///
/// # Lifecycle
///
/// 1. The orchestrator spawns `serve()` as its own task; the worker runs
///    until shutdown is requested.
/// 2. `shutdown()` requests termination. It is spawned as its own task too,
///    so implementations should return promptly, but a misbehaving
///    implementation cannot stall the orchestrator either way.
///
/// Serve-loop failures are the worker's own concern: implementations log
/// them and exit rather than returning them.
pub trait IngestWorker: Send + Sync {
    /// Runs the worker until shutdown is requested.
    ///
    /// Must be called at most once. Errors are logged internally, not
    /// returned.
    fn serve(&self) -> BoxFuture<'_, ()>;

    /// Requests termination of the serve loop.
    ///
    /// Safe to call before `serve()`, concurrently with it, and more than
    /// once.
    fn shutdown(&self) -> BoxFuture<'_, ()>;

    /// Short label identifying this worker in logs and diagnostics.
    fn label(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trait must remain usable as a trait object.
    fn _assert_object_safety(_: &dyn IngestWorker) {}
}
