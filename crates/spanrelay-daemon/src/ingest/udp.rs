//! UDP ingestion worker.
//!
//! One worker owns one UDP socket. The serve loop reads datagrams and
//! pushes the raw payloads into a bounded queue; a pool of consumer tasks
//! drains the queue, decodes each payload into a span batch, and hands it
//! to the configured [`BatchForwarder`].
//!
//! # Architecture
//!
//! ```text
//! socket.recv_from --> bounded mpsc queue --> consumer tasks
//!      (1 loop)          (drops on full)        (decode + forward)
//! ```
//!
//! # Backpressure
//!
//! The queue is the only buffer. When it is full the newest datagram is
//! dropped and counted; the socket loop never blocks on the forwarder, so a
//! slow collector degrades to drops instead of unbounded memory growth.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use spanrelay_core::codec::{self, DecodeLimits};

use super::IngestWorker;
use crate::BoxFuture;
use crate::forward::BatchForwarder;

/// Largest datagram the serve loop will read (IPv4 UDP maximum).
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Minimum queue depth.
pub const MIN_QUEUE_DEPTH: usize = 1;

/// Maximum queue depth.
pub const MAX_QUEUE_DEPTH: usize = 65_536;

/// Default queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Minimum consumer task count.
pub const MIN_CONSUMERS: usize = 1;

/// Maximum consumer task count.
pub const MAX_CONSUMERS: usize = 64;

/// Default consumer task count.
pub const DEFAULT_CONSUMERS: usize = 4;

/// Configuration for one UDP ingestion worker.
#[derive(Debug, Clone)]
pub struct UdpIngestConfig {
    bind_addr: SocketAddr,
    queue_depth: usize,
    consumers: usize,
    limits: DecodeLimits,
}

impl UdpIngestConfig {
    /// Creates a configuration with defaults for everything but the bind
    /// address. A port of `0` requests an ephemeral port.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            consumers: DEFAULT_CONSUMERS,
            limits: DecodeLimits::default(),
        }
    }

    /// Sets the queue depth, clamped to `[MIN_QUEUE_DEPTH, MAX_QUEUE_DEPTH]`.
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.clamp(MIN_QUEUE_DEPTH, MAX_QUEUE_DEPTH);
        self
    }

    /// Sets the consumer task count, clamped to
    /// `[MIN_CONSUMERS, MAX_CONSUMERS]`.
    #[must_use]
    pub fn with_consumers(mut self, consumers: usize) -> Self {
        self.consumers = consumers.clamp(MIN_CONSUMERS, MAX_CONSUMERS);
        self
    }

    /// Sets the decode limits applied to each datagram.
    #[must_use]
    pub const fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns the configured bind address.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Returns the queue depth.
    #[must_use]
    pub const fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Returns the consumer task count.
    #[must_use]
    pub const fn consumers(&self) -> usize {
        self.consumers
    }
}

#[derive(Debug, Default)]
struct IngestStats {
    received: AtomicU64,
    dropped: AtomicU64,
    decode_failures: AtomicU64,
    forwarded: AtomicU64,
    forward_failures: AtomicU64,
}

/// Point-in-time snapshot of a worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    /// Datagrams read from the socket.
    pub received: u64,
    /// Datagrams dropped because the queue was full.
    pub dropped: u64,
    /// Payloads rejected by the decoder.
    pub decode_failures: u64,
    /// Batches successfully handed to the forwarder.
    pub forwarded: u64,
    /// Batches the forwarder rejected.
    pub forward_failures: u64,
}

impl IngestStats {
    fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
        }
    }
}

/// UDP ingestion worker: socket loop, bounded queue, consumer pool.
pub struct UdpIngestWorker {
    label: String,
    config: UdpIngestConfig,
    forwarder: Arc<dyn BatchForwarder>,
    shutdown: Notify,
    shutting_down: AtomicBool,
    bound_addr: OnceLock<SocketAddr>,
    stats: Arc<IngestStats>,
}

impl UdpIngestWorker {
    /// Creates a worker. Nothing is bound until `serve()` runs.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        config: UdpIngestConfig,
        forwarder: Arc<dyn BatchForwarder>,
    ) -> Self {
        Self {
            label: label.into(),
            config,
            forwarder,
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
            bound_addr: OnceLock::new(),
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Returns the address the socket ended up bound to, once `serve()`
    /// has bound it. Relevant when the configured port was `0`.
    #[must_use]
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr.get().copied()
    }

    /// Returns a snapshot of the worker's counters.
    #[must_use]
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    async fn run(&self) {
        let socket = match UdpSocket::bind(self.config.bind_addr).await {
            Ok(socket) => socket,
            Err(err) => {
                error!(
                    worker = %self.label,
                    addr = %self.config.bind_addr,
                    error = %err,
                    "failed to bind ingest socket"
                );
                return;
            }
        };
        let local_addr = match socket.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                error!(worker = %self.label, error = %err, "failed to resolve ingest socket address");
                return;
            }
        };
        let _ = self.bound_addr.set(local_addr);
        info!(worker = %self.label, addr = %local_addr, "ingest socket bound");

        let (tx, rx) = mpsc::channel::<Bytes>(self.config.queue_depth);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut consumers = Vec::with_capacity(self.config.consumers);
        for index in 0..self.config.consumers {
            consumers.push(tokio::spawn(consume_loop(
                self.label.clone(),
                index,
                Arc::clone(&rx),
                self.config.limits,
                Arc::clone(&self.forwarder),
                Arc::clone(&self.stats),
            )));
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(worker = %self.label, "ingest shutdown requested");
                    break;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, _peer)) => {
                        self.stats.received.fetch_add(1, Ordering::Relaxed);
                        let payload = Bytes::copy_from_slice(&buf[..len]);
                        match tx.try_send(payload) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                                debug!(worker = %self.label, "ingest queue full, datagram dropped");
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                    Err(err) => {
                        if self.shutting_down.load(Ordering::Acquire) {
                            break;
                        }
                        error!(worker = %self.label, error = %err, "ingest socket read failed");
                        break;
                    }
                },
            }
        }

        // Dropping the sender lets consumers drain what is already queued
        // and then exit.
        drop(tx);
        for consumer in consumers {
            let _ = consumer.await;
        }
        info!(worker = %self.label, "ingestion worker exiting");
    }
}

async fn consume_loop(
    label: String,
    index: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Bytes>>>,
    limits: DecodeLimits,
    forwarder: Arc<dyn BatchForwarder>,
    stats: Arc<IngestStats>,
) {
    loop {
        let payload = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(payload) = payload else {
            debug!(worker = %label, consumer = index, "ingest queue closed");
            return;
        };

        let batch = match codec::decode_batch(&payload, &limits) {
            Ok(batch) => batch,
            Err(err) => {
                stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                debug!(worker = %label, error = %err, "datagram rejected");
                continue;
            }
        };

        match forwarder.forward(batch).await {
            Ok(()) => {
                stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                stats.forward_failures.fetch_add(1, Ordering::Relaxed);
                warn!(worker = %label, error = %err, "batch forwarding failed");
            }
        }
    }
}

impl IngestWorker for UdpIngestWorker {
    fn serve(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.run())
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.shutting_down.store(true, Ordering::Release);
            // notify_one stores a permit, so a shutdown that lands before
            // the serve loop registers is not lost.
            self.shutdown.notify_one();
        })
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for UdpIngestWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpIngestWorker")
            .field("label", &self.label)
            .field("config", &self.config)
            .field("bound_addr", &self.bound_addr.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use spanrelay_core::span::{SpanBatch, SpanRecord};

    use super::*;
    use crate::forward::MemoryBatchForwarder;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().expect("addr")
    }

    fn sample_batch() -> SpanBatch {
        let mut batch = SpanBatch::new("checkout");
        batch.push_span(SpanRecord {
            trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            span_id: "b7ad6b7169203331".to_string(),
            parent_span_id: None,
            operation: "GET /checkout".to_string(),
            start_unix_ns: 1_700_000_000_000_000_000,
            duration_ns: 1_500_000,
            tags: std::collections::BTreeMap::new(),
        });
        batch
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    #[test]
    fn test_config_defaults() {
        let config = UdpIngestConfig::new(loopback());
        assert_eq!(config.queue_depth(), DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.consumers(), DEFAULT_CONSUMERS);
    }

    #[test]
    fn test_config_clamps_bounds() {
        let config = UdpIngestConfig::new(loopback())
            .with_queue_depth(0)
            .with_consumers(1000);
        assert_eq!(config.queue_depth(), MIN_QUEUE_DEPTH);
        assert_eq!(config.consumers(), MAX_CONSUMERS);
    }

    // =========================================================================
    // Serve loop
    // =========================================================================

    #[tokio::test]
    async fn test_datagram_is_decoded_and_forwarded() {
        let forwarder = Arc::new(MemoryBatchForwarder::new());
        let worker = Arc::new(UdpIngestWorker::new(
            "udp-test",
            UdpIngestConfig::new(loopback()),
            Arc::clone(&forwarder) as Arc<dyn BatchForwarder>,
        ));

        let serving = Arc::clone(&worker);
        tokio::spawn(async move { serving.serve().await });
        wait_until(|| worker.bound_addr().is_some()).await;
        let addr = worker.bound_addr().expect("bound");

        let payload = spanrelay_core::codec::encode_batch(&sample_batch()).expect("encode");
        let client = UdpSocket::bind(loopback()).await.expect("client socket");
        client.send_to(&payload, addr).await.expect("send");

        wait_until(|| forwarder.len() == 1).await;
        assert_eq!(forwarder.batches()[0].service, "checkout");
        let stats = worker.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.decode_failures, 0);

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_garbage_datagram_counted_not_forwarded() {
        let forwarder = Arc::new(MemoryBatchForwarder::new());
        let worker = Arc::new(UdpIngestWorker::new(
            "udp-test",
            UdpIngestConfig::new(loopback()),
            Arc::clone(&forwarder) as Arc<dyn BatchForwarder>,
        ));

        let serving = Arc::clone(&worker);
        tokio::spawn(async move { serving.serve().await });
        wait_until(|| worker.bound_addr().is_some()).await;
        let addr = worker.bound_addr().expect("bound");

        let client = UdpSocket::bind(loopback()).await.expect("client socket");
        client.send_to(b"not a batch", addr).await.expect("send");

        wait_until(|| worker.stats().decode_failures == 1).await;
        assert!(forwarder.is_empty());
        assert_eq!(worker.stats().forwarded, 0);

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_forward_failure_counted() {
        let forwarder = Arc::new(MemoryBatchForwarder::new());
        forwarder.set_failing(true);
        let worker = Arc::new(UdpIngestWorker::new(
            "udp-test",
            UdpIngestConfig::new(loopback()),
            Arc::clone(&forwarder) as Arc<dyn BatchForwarder>,
        ));

        let serving = Arc::clone(&worker);
        tokio::spawn(async move { serving.serve().await });
        wait_until(|| worker.bound_addr().is_some()).await;
        let addr = worker.bound_addr().expect("bound");

        let payload = spanrelay_core::codec::encode_batch(&sample_batch()).expect("encode");
        let client = UdpSocket::bind(loopback()).await.expect("client socket");
        client.send_to(&payload, addr).await.expect("send");

        wait_until(|| worker.stats().forward_failures == 1).await;
        assert!(forwarder.is_empty());

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_before_serve_exits_promptly() {
        let forwarder = Arc::new(MemoryBatchForwarder::new());
        let worker = Arc::new(UdpIngestWorker::new(
            "udp-test",
            UdpIngestConfig::new(loopback()),
            forwarder as Arc<dyn BatchForwarder>,
        ));

        worker.shutdown().await;
        // The stored permit makes serve() exit on its first loop pass.
        tokio::time::timeout(Duration::from_secs(2), worker.serve())
            .await
            .expect("serve should exit after pre-arrival shutdown");
    }
}
