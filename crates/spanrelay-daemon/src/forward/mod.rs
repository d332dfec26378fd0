//! Batch forwarding to the remote collector.
//!
//! A [`BatchForwarder`] is the downstream edge of the relay: ingestion
//! workers hand it decoded batches and it gets them off-host. The daemon
//! ships a TCP implementation ([`TcpBatchForwarder`]) and an in-memory sink
//! ([`MemoryBatchForwarder`]) for unit tests.

use std::net::SocketAddr;

use thiserror::Error;

use spanrelay_core::codec::CodecError;
use spanrelay_core::span::SpanBatch;

use crate::BoxFuture;

pub mod memory;
pub mod tcp;

pub use memory::MemoryBatchForwarder;
pub use tcp::TcpBatchForwarder;

/// Errors produced while forwarding a batch.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ForwardError {
    /// The batch could not be framed.
    #[error("batch could not be encoded: {source}")]
    Encode {
        /// The codec failure.
        #[source]
        source: CodecError,
    },

    /// Connecting to the collector failed.
    #[error("collector connection to {addr} failed: {source}")]
    Connect {
        /// Collector endpoint.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing the frame failed after a reconnect attempt.
    #[error("collector write failed: {source}")]
    Write {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The forwarder no longer accepts batches.
    #[error("forwarder is closed")]
    Closed,
}

/// Trait for batch forwarders.
///
/// Implementations are shared across consumer tasks and must be safe to
/// call concurrently. A returned error applies to the one batch passed in;
/// the forwarder itself stays usable.
pub trait BatchForwarder: Send + Sync {
    /// Forwards one batch toward the collector.
    fn forward(&self, batch: SpanBatch) -> BoxFuture<'_, Result<(), ForwardError>>;
}
