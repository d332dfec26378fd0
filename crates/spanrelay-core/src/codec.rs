//! Bounded payload encoding and length-prefixed stream framing.
//!
//! Two transports carry [`SpanBatch`] payloads and both use the same JSON
//! body encoding:
//!
//! - **Datagrams** (client -> daemon): one datagram is one encoded batch;
//!   the datagram boundary delimits the payload.
//! - **Streams** (daemon -> collector): each batch is framed as a big-endian
//!   `u32` payload length followed by the payload.
//!
//! # Bounded decoding
//!
//! Decoding is driven by [`DecodeLimits`] and fails closed: an oversized
//! length prefix or payload is rejected before any parse work happens, and a
//! parsed batch is rejected if it exceeds the span-count bound or fails
//! model validation. Decoders never trust remote length claims beyond the
//! configured ceiling.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::span::{MAX_SPANS_PER_BATCH, SpanBatch, SpanValidationError};

/// Size of the stream frame length prefix in bytes.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Hard ceiling on payload size, stream or datagram (16 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Default payload ceiling, sized to the largest UDP datagram the daemon
/// accepts (64 KiB covers IPv4's 65507-byte maximum).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Limits applied while decoding remote payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    max_payload_bytes: usize,
    max_spans: usize,
}

impl DecodeLimits {
    /// Creates limits with explicit bounds.
    ///
    /// Both bounds are clamped to the hard ceilings
    /// ([`MAX_PAYLOAD_BYTES`], [`MAX_SPANS_PER_BATCH`]).
    #[must_use]
    pub const fn new(max_payload_bytes: usize, max_spans: usize) -> Self {
        let max_payload_bytes = if max_payload_bytes > MAX_PAYLOAD_BYTES {
            MAX_PAYLOAD_BYTES
        } else {
            max_payload_bytes
        };
        let max_spans = if max_spans > MAX_SPANS_PER_BATCH {
            MAX_SPANS_PER_BATCH
        } else {
            max_spans
        };
        Self {
            max_payload_bytes,
            max_spans,
        }
    }

    /// Returns the payload size bound in bytes.
    #[must_use]
    pub const fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Returns the span-count bound per batch.
    #[must_use]
    pub const fn max_spans(&self) -> usize {
        self.max_spans
    }
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_BYTES, MAX_SPANS_PER_BATCH)
    }
}

/// Errors produced while encoding or decoding batches.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Payload exceeds the configured size bound.
    #[error("payload size exceeds limit: {actual} > {max} bytes")]
    PayloadTooLarge {
        /// Claimed or actual payload size.
        actual: usize,
        /// Configured bound.
        max: usize,
    },

    /// Batch carries more spans than the configured bound.
    #[error("span count exceeds limit: {actual} > {max}")]
    TooManySpans {
        /// Actual span count.
        actual: usize,
        /// Configured bound.
        max: usize,
    },

    /// Payload is not a well-formed encoded batch.
    #[error("malformed batch payload: {reason}")]
    Malformed {
        /// Parser failure description.
        reason: String,
    },

    /// Payload parsed but the batch failed model validation.
    #[error("batch failed validation: {0}")]
    Invalid(#[from] SpanValidationError),
}

/// Encodes a batch into its payload representation.
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLarge`] if the encoded form exceeds the
/// hard payload ceiling, or [`CodecError::Malformed`] if serialization
/// fails.
pub fn encode_batch(batch: &SpanBatch) -> Result<Bytes, CodecError> {
    let payload = serde_json::to_vec(batch).map_err(|err| CodecError::Malformed {
        reason: err.to_string(),
    })?;
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge {
            actual: payload.len(),
            max: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(Bytes::from(payload))
}

/// Decodes one payload into a validated batch.
///
/// # Errors
///
/// Fails closed on any exceeded bound, parse failure, or validation
/// failure.
pub fn decode_batch(payload: &[u8], limits: &DecodeLimits) -> Result<SpanBatch, CodecError> {
    if payload.len() > limits.max_payload_bytes() {
        return Err(CodecError::PayloadTooLarge {
            actual: payload.len(),
            max: limits.max_payload_bytes(),
        });
    }
    let batch: SpanBatch = serde_json::from_slice(payload).map_err(|err| CodecError::Malformed {
        reason: err.to_string(),
    })?;
    if batch.spans.len() > limits.max_spans() {
        return Err(CodecError::TooManySpans {
            actual: batch.spans.len(),
            max: limits.max_spans(),
        });
    }
    batch.validate()?;
    Ok(batch)
}

/// Encodes a batch as a length-prefixed stream frame.
///
/// # Errors
///
/// Same failure modes as [`encode_batch`].
pub fn encode_frame(batch: &SpanBatch) -> Result<Bytes, CodecError> {
    let payload = encode_batch(batch)?;
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    frame.put_u32(u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge {
        actual: payload.len(),
        max: MAX_PAYLOAD_BYTES,
    })?);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Incremental decoder for length-prefixed batch frames on a byte stream.
///
/// Feed received bytes into a [`BytesMut`] and call
/// [`decode`](Self::decode) until it returns `Ok(None)`; partial frames stay
/// buffered until the rest arrives.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    limits: DecodeLimits,
}

impl FrameDecoder {
    /// Creates a decoder with the given limits.
    #[must_use]
    pub const fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    /// Attempts to decode one complete frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(batch))` when a full frame was consumed,
    /// `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns an error on an oversized length prefix or a malformed
    /// payload. The buffer is left unconsumed on error; callers should
    /// drop the connection.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<SpanBatch>, CodecError> {
        if buf.len() < LENGTH_PREFIX_BYTES {
            return Ok(None);
        }
        let claimed = {
            let mut prefix = &buf[..LENGTH_PREFIX_BYTES];
            prefix.get_u32() as usize
        };
        if claimed > self.limits.max_payload_bytes() {
            return Err(CodecError::PayloadTooLarge {
                actual: claimed,
                max: self.limits.max_payload_bytes(),
            });
        }
        if buf.len() < LENGTH_PREFIX_BYTES + claimed {
            return Ok(None);
        }
        buf.advance(LENGTH_PREFIX_BYTES);
        let payload = buf.split_to(claimed);
        decode_batch(&payload, &self.limits).map(Some)
    }
}
