//! Daemon configuration.
//!
//! [`DaemonConfig`] is the JSON shape `spanrelayd` loads at startup.
//! `validate()` applies the bounds below; `build()` wires the forwarder,
//! the ingestion workers, and the control plane into a ready-to-start
//! [`RelayOrchestrator`].
//!
//! # Example
//!
//! ```json
//! {
//!     "control": {
//!         "bind_addr": "127.0.0.1:5778",
//!         "sampling": { "default_rate": 0.001 }
//!     },
//!     "ingest": [
//!         { "bind_addr": "127.0.0.1:6831" },
//!         { "bind_addr": "127.0.0.1:6832", "queue_depth": 4096, "consumers": 8 }
//!     ],
//!     "collector": { "addr": "10.0.0.7:14250" }
//! }
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use spanrelay_core::sampling::{InvalidSamplingRate, SamplingStrategy};

use crate::control::{
    FileStrategyProvider, StaticStrategyProvider, StrategyFileError, StrategyProvider,
    control_router,
};
use crate::forward::TcpBatchForwarder;
use crate::ingest::udp::{
    MAX_CONSUMERS, MAX_QUEUE_DEPTH, MIN_CONSUMERS, MIN_QUEUE_DEPTH, UdpIngestConfig,
    UdpIngestWorker,
};
use crate::ingest::IngestWorker;
use crate::orchestrator::{ControlPlane, RelayOrchestrator};

/// Default queue depth per ingest endpoint.
pub const DEFAULT_QUEUE_DEPTH: usize = crate::ingest::udp::DEFAULT_QUEUE_DEPTH;

/// Default consumer task count per ingest endpoint.
pub const DEFAULT_CONSUMERS: usize = crate::ingest::udp::DEFAULT_CONSUMERS;

/// Errors loading, validating, or building from a configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not well-formed.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// The parser failure.
        #[source]
        source: serde_json::Error,
    },

    /// No ingest endpoints configured.
    #[error("at least one ingest endpoint is required")]
    NoIngestEndpoints,

    /// The default sampling rate is out of range.
    #[error(transparent)]
    InvalidDefaultRate(#[from] InvalidSamplingRate),

    /// The strategies file could not be loaded.
    #[error(transparent)]
    Strategies(#[from] StrategyFileError),

    /// An ingest endpoint's queue depth is out of range.
    #[error(
        "ingest endpoint {index}: queue_depth {actual} outside [{min}, {max}]",
        min = MIN_QUEUE_DEPTH,
        max = MAX_QUEUE_DEPTH
    )]
    QueueDepthOutOfRange {
        /// Endpoint index in the `ingest` list.
        index: usize,
        /// The rejected value.
        actual: usize,
    },

    /// An ingest endpoint's consumer count is out of range.
    #[error(
        "ingest endpoint {index}: consumers {actual} outside [{min}, {max}]",
        min = MIN_CONSUMERS,
        max = MAX_CONSUMERS
    )]
    ConsumersOutOfRange {
        /// Endpoint index in the `ingest` list.
        index: usize,
        /// The rejected value.
        actual: usize,
    },
}

/// Control-plane section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    /// Address the control-plane HTTP server binds. Port `0` requests an
    /// ephemeral port.
    pub bind_addr: SocketAddr,

    /// Sampling configuration.
    #[serde(default)]
    pub sampling: SamplingConfig,
}

/// Sampling section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    /// Probabilistic rate served to services without explicit strategies.
    /// Ignored when `strategies_file` is set; the file's own default wins.
    #[serde(default = "default_sampling_rate")]
    pub default_rate: f64,

    /// Optional JSON file with per-service strategy overrides.
    #[serde(default)]
    pub strategies_file: Option<PathBuf>,
}

fn default_sampling_rate() -> f64 {
    spanrelay_core::sampling::DEFAULT_SAMPLING_RATE
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            default_rate: default_sampling_rate(),
            strategies_file: None,
        }
    }
}

/// One UDP ingest endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestEndpoint {
    /// Address the UDP socket binds. Port `0` requests an ephemeral port.
    pub bind_addr: SocketAddr,

    /// Queue depth between the socket loop and the consumer pool.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Number of consumer tasks draining the queue.
    #[serde(default = "default_consumers")]
    pub consumers: usize,

    /// Label used in logs. Defaults to `udp-<bind_addr>`.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_consumers() -> usize {
    DEFAULT_CONSUMERS
}

/// Collector section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    /// Collector endpoint batches are forwarded to over TCP.
    pub addr: SocketAddr,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Control-plane section.
    pub control: ControlConfig,

    /// Ingest endpoints; at least one is required.
    pub ingest: Vec<IngestEndpoint>,

    /// Collector section.
    pub collector: CollectorConfig,
}

impl DaemonConfig {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails on unreadable or malformed files and on any validation
    /// failure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration against all bounds.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.is_empty() {
            return Err(ConfigError::NoIngestEndpoints);
        }
        SamplingStrategy::probabilistic(self.control.sampling.default_rate)?;
        for (index, endpoint) in self.ingest.iter().enumerate() {
            if !(MIN_QUEUE_DEPTH..=MAX_QUEUE_DEPTH).contains(&endpoint.queue_depth) {
                return Err(ConfigError::QueueDepthOutOfRange {
                    index,
                    actual: endpoint.queue_depth,
                });
            }
            if !(MIN_CONSUMERS..=MAX_CONSUMERS).contains(&endpoint.consumers) {
                return Err(ConfigError::ConsumersOutOfRange {
                    index,
                    actual: endpoint.consumers,
                });
            }
        }
        Ok(())
    }

    /// Builds a ready-to-start orchestrator from this configuration.
    ///
    /// # Errors
    ///
    /// Fails on validation failures and on an unloadable strategies file.
    /// Performs no network I/O; sockets are bound by
    /// [`RelayOrchestrator::start`].
    pub fn build(&self) -> Result<RelayOrchestrator, ConfigError> {
        self.validate()?;

        let provider: Arc<dyn StrategyProvider> =
            match &self.control.sampling.strategies_file {
                Some(path) => Arc::new(FileStrategyProvider::from_file(path)?),
                None => Arc::new(StaticStrategyProvider::new(
                    SamplingStrategy::probabilistic(self.control.sampling.default_rate)?,
                )),
            };

        let forwarder = Arc::new(TcpBatchForwarder::new(self.collector.addr));

        let workers: Vec<Arc<dyn IngestWorker>> = self
            .ingest
            .iter()
            .map(|endpoint| {
                let label = endpoint
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("udp-{}", endpoint.bind_addr));
                let config = UdpIngestConfig::new(endpoint.bind_addr)
                    .with_queue_depth(endpoint.queue_depth)
                    .with_consumers(endpoint.consumers);
                Arc::new(UdpIngestWorker::new(
                    label,
                    config,
                    Arc::clone(&forwarder) as Arc<dyn crate::forward::BatchForwarder>,
                )) as Arc<dyn IngestWorker>
            })
            .collect();

        let control = ControlPlane::new(self.control.bind_addr, control_router(provider));
        Ok(RelayOrchestrator::new(workers, control))
    }
}
