//! TCP batch forwarder.
//!
//! Writes length-prefixed batch frames (see `spanrelay_core::codec`) to the
//! collector endpoint over a single lazily established connection. A failed
//! write tears the connection down and retries once on a fresh one; beyond
//! that the error is returned and the caller decides what to count or log.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use spanrelay_core::codec::encode_frame;
use spanrelay_core::span::SpanBatch;

use super::{BatchForwarder, ForwardError};
use crate::BoxFuture;

/// Forwards batches to the collector over TCP.
///
/// The connection is established on first use and reused across batches.
/// All consumer tasks share one connection; the internal lock serializes
/// writes so frames never interleave.
pub struct TcpBatchForwarder {
    collector_addr: SocketAddr,
    conn: Mutex<Option<TcpStream>>,
}

impl TcpBatchForwarder {
    /// Creates a forwarder targeting the given collector endpoint.
    ///
    /// Performs no I/O; the connection is established on the first
    /// `forward` call.
    #[must_use]
    pub fn new(collector_addr: SocketAddr) -> Self {
        Self {
            collector_addr,
            conn: Mutex::new(None),
        }
    }

    /// Returns the collector endpoint.
    #[must_use]
    pub const fn collector_addr(&self) -> SocketAddr {
        self.collector_addr
    }

    async fn write_frame(&self, frame: &Bytes) -> Result<(), ForwardError> {
        let mut guard = self.conn.lock().await;

        if let Some(stream) = guard.as_mut() {
            match stream.write_all(frame).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(
                        collector = %self.collector_addr,
                        error = %err,
                        "collector connection lost, reconnecting"
                    );
                    *guard = None;
                }
            }
        }

        let mut stream =
            TcpStream::connect(self.collector_addr)
                .await
                .map_err(|source| ForwardError::Connect {
                    addr: self.collector_addr,
                    source,
                })?;
        stream
            .write_all(frame)
            .await
            .map_err(|source| ForwardError::Write { source })?;
        *guard = Some(stream);
        Ok(())
    }
}

impl BatchForwarder for TcpBatchForwarder {
    fn forward(&self, batch: SpanBatch) -> BoxFuture<'_, Result<(), ForwardError>> {
        Box::pin(async move {
            let frame = encode_frame(&batch).map_err(|source| {
                warn!(service = %batch.service, "dropping unencodable batch");
                ForwardError::Encode { source }
            })?;
            self.write_frame(&frame).await
        })
    }
}

impl std::fmt::Debug for TcpBatchForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpBatchForwarder")
            .field("collector_addr", &self.collector_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use spanrelay_core::codec::FrameDecoder;

    use super::*;

    /// Accepts connections and decodes every frame into the channel.
    async fn fake_collector(listener: TcpListener, tx: mpsc::UnboundedSender<SpanBatch>) {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let decoder = FrameDecoder::default();
                let mut buf = BytesMut::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let Ok(read) = stream.read(&mut chunk).await else {
                        return;
                    };
                    if read == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..read]);
                    while let Ok(Some(batch)) = decoder.decode(&mut buf) {
                        if tx.send(batch).is_err() {
                            return;
                        }
                    }
                }
            });
        }
    }

    #[tokio::test]
    async fn test_frames_reach_the_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener");
        let addr = listener.local_addr().expect("addr");
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_collector(listener, tx));

        let forwarder = TcpBatchForwarder::new(addr);
        forwarder
            .forward(SpanBatch::new("checkout"))
            .await
            .expect("first batch");
        forwarder
            .forward(SpanBatch::new("billing"))
            .await
            .expect("second batch");

        let first = rx.recv().await.expect("first frame");
        let second = rx.recv().await.expect("second frame");
        assert_eq!(first.service, "checkout");
        assert_eq!(second.service, "billing");
    }

    #[tokio::test]
    async fn test_connect_failure_is_returned() {
        // Bind-then-drop yields an address nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let forwarder = TcpBatchForwarder::new(addr);
        let err = forwarder
            .forward(SpanBatch::new("checkout"))
            .await
            .expect_err("no collector");
        assert!(matches!(err, ForwardError::Connect { .. }));
    }
}
