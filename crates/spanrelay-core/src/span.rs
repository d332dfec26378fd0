//! Span batch telemetry model.
//!
//! Client libraries emit [`SpanBatch`] payloads: every batch names the
//! originating service and carries a bounded list of finished spans. The
//! daemon never inspects span semantics beyond validation; batches flow
//! through it as opaque-but-well-formed units.
//!
//! # Bounds
//!
//! All limits are named constants. Validation fails closed: a batch that
//! exceeds any bound is rejected before it enters the relay queue, so a
//! single misbehaving client cannot grow daemon memory without bound.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a service name in bytes.
pub const MAX_SERVICE_NAME_LEN: usize = 256;

/// Maximum length of an operation name in bytes.
pub const MAX_OPERATION_NAME_LEN: usize = 1024;

/// Maximum number of spans carried by a single batch.
pub const MAX_SPANS_PER_BATCH: usize = 4096;

/// Maximum number of tags on a single span or batch.
pub const MAX_TAGS: usize = 64;

/// Maximum length of a tag key or value in bytes.
pub const MAX_TAG_LEN: usize = 1024;

/// Maximum length of a trace or span identifier in hex characters.
///
/// Trace identifiers are at most 128 bits (32 hex characters); span
/// identifiers are at most 64 bits but share the same ceiling.
pub const MAX_ID_HEX_LEN: usize = 32;

/// A single finished span as reported by a client library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Trace identifier, lowercase hex.
    pub trace_id: String,

    /// Span identifier, lowercase hex.
    pub span_id: String,

    /// Parent span identifier, lowercase hex. Absent for root spans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// Operation name.
    pub operation: String,

    /// Span start, nanoseconds since the unix epoch.
    pub start_unix_ns: u64,

    /// Span duration in nanoseconds.
    pub duration_ns: u64,

    /// Span tags. `BTreeMap` keeps serialized output deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// A batch of spans emitted by one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanBatch {
    /// Name of the service that produced the spans.
    pub service: String,

    /// Host-level tags attached by the client (hostname, client version).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub host_tags: BTreeMap<String, String>,

    /// The spans themselves.
    pub spans: Vec<SpanRecord>,
}

/// Errors produced by batch validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpanValidationError {
    /// Service name is empty.
    #[error("service name must not be empty")]
    EmptyServiceName,

    /// Service name too long.
    #[error("service name exceeds max length: {actual} > {max}")]
    ServiceNameTooLong {
        /// Actual length in bytes.
        actual: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Too many spans in one batch.
    #[error("span count exceeds max per batch: {actual} > {max}")]
    TooManySpans {
        /// Actual span count.
        actual: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// A span identifier is empty, too long, or not lowercase hex.
    #[error("invalid {field} on span {index}: {value:?}")]
    InvalidId {
        /// Which identifier field was rejected.
        field: &'static str,
        /// Index of the offending span within the batch.
        index: usize,
        /// The rejected value.
        value: String,
    },

    /// An operation name is empty or too long.
    #[error("invalid operation name on span {index}")]
    InvalidOperation {
        /// Index of the offending span within the batch.
        index: usize,
    },

    /// Too many tags, or a tag key/value is too long.
    #[error("invalid tags on span {index}")]
    InvalidTags {
        /// Index of the offending span within the batch; `usize::MAX` for
        /// batch-level host tags.
        index: usize,
    },
}

impl SpanBatch {
    /// Creates an empty batch for the given service.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            host_tags: BTreeMap::new(),
            spans: Vec::new(),
        }
    }

    /// Appends a span to the batch.
    pub fn push_span(&mut self, span: SpanRecord) {
        self.spans.push(span);
    }

    /// Returns the number of spans in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns `true` if the batch carries no spans.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Validates the batch against all model bounds.
    ///
    /// # Errors
    ///
    /// Returns the first bound violation found, scanning batch-level fields
    /// before spans and spans in order.
    pub fn validate(&self) -> Result<(), SpanValidationError> {
        if self.service.is_empty() {
            return Err(SpanValidationError::EmptyServiceName);
        }
        if self.service.len() > MAX_SERVICE_NAME_LEN {
            return Err(SpanValidationError::ServiceNameTooLong {
                actual: self.service.len(),
                max: MAX_SERVICE_NAME_LEN,
            });
        }
        if self.spans.len() > MAX_SPANS_PER_BATCH {
            return Err(SpanValidationError::TooManySpans {
                actual: self.spans.len(),
                max: MAX_SPANS_PER_BATCH,
            });
        }
        if !tags_within_bounds(&self.host_tags) {
            return Err(SpanValidationError::InvalidTags { index: usize::MAX });
        }

        for (index, span) in self.spans.iter().enumerate() {
            span.validate_at(index)?;
        }
        Ok(())
    }
}

impl SpanRecord {
    fn validate_at(&self, index: usize) -> Result<(), SpanValidationError> {
        if !is_hex_id(&self.trace_id) {
            return Err(SpanValidationError::InvalidId {
                field: "trace_id",
                index,
                value: self.trace_id.clone(),
            });
        }
        if !is_hex_id(&self.span_id) {
            return Err(SpanValidationError::InvalidId {
                field: "span_id",
                index,
                value: self.span_id.clone(),
            });
        }
        if let Some(parent) = &self.parent_span_id
            && !is_hex_id(parent)
        {
            return Err(SpanValidationError::InvalidId {
                field: "parent_span_id",
                index,
                value: parent.clone(),
            });
        }
        if self.operation.is_empty() || self.operation.len() > MAX_OPERATION_NAME_LEN {
            return Err(SpanValidationError::InvalidOperation { index });
        }
        if !tags_within_bounds(&self.tags) {
            return Err(SpanValidationError::InvalidTags { index });
        }
        Ok(())
    }
}

/// Returns `true` if `id` is non-empty lowercase hex within the length bound.
fn is_hex_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_HEX_LEN
        && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn tags_within_bounds(tags: &BTreeMap<String, String>) -> bool {
    tags.len() <= MAX_TAGS
        && tags
            .iter()
            .all(|(k, v)| !k.is_empty() && k.len() <= MAX_TAG_LEN && v.len() <= MAX_TAG_LEN)
}
