//! Shared data model and wire framing for the spanrelay daemon.
//!
//! This crate holds the types that cross process boundaries:
//!
//! - [`span`]: the span/batch telemetry model emitted by client libraries
//! - [`codec`]: bounded payload encoding and length-prefixed stream framing
//! - [`sampling`]: the sampling strategy schema served by the control plane
//!
//! The daemon crate (`spanrelay-daemon`) consumes these types on both of its
//! transport edges: decoding batches arriving over UDP and framing batches
//! forwarded to the collector over TCP.

pub mod codec;
pub mod sampling;
pub mod span;

pub use codec::{CodecError, DecodeLimits, FrameDecoder, decode_batch, encode_batch, encode_frame};
pub use sampling::{InvalidSamplingRate, SamplingStrategy, StrategyResponse};
pub use span::{SpanBatch, SpanRecord, SpanValidationError};
