//! Sampling control plane.
//!
//! Co-located clients poll `GET /sampling?service=<name>` for the sampling
//! strategy their service should apply. Strategy lookup is behind the
//! [`StrategyProvider`] trait; the daemon ships a fixed-default provider
//! and a file-backed provider with per-service overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use spanrelay_core::sampling::{InvalidSamplingRate, SamplingStrategy};

pub mod http;

pub use http::control_router;

/// Trait for sampling strategy lookup.
pub trait StrategyProvider: Send + Sync {
    /// Returns the strategy clients of `service` should apply.
    ///
    /// Never fails: services without explicit configuration get the
    /// provider's default strategy.
    fn strategy_for(&self, service: &str) -> SamplingStrategy;
}

/// Serves one fixed strategy to every service.
#[derive(Debug, Clone, Copy)]
pub struct StaticStrategyProvider {
    default_strategy: SamplingStrategy,
}

impl StaticStrategyProvider {
    /// Creates a provider serving the given strategy.
    #[must_use]
    pub const fn new(default_strategy: SamplingStrategy) -> Self {
        Self { default_strategy }
    }
}

impl Default for StaticStrategyProvider {
    fn default() -> Self {
        Self::new(SamplingStrategy::default())
    }
}

impl StrategyProvider for StaticStrategyProvider {
    fn strategy_for(&self, _service: &str) -> SamplingStrategy {
        self.default_strategy
    }
}

/// Errors loading a strategies file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StrategyFileError {
    /// The file could not be read.
    #[error("failed to read strategies file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not well-formed JSON of the expected shape.
    #[error("failed to parse strategies file {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// The parser failure.
        #[source]
        source: serde_json::Error,
    },

    /// A strategy in the file failed validation.
    #[error("invalid strategy for service {service:?}: {source}")]
    InvalidStrategy {
        /// Service the strategy was configured for; `"(default)"` for the
        /// file-level default.
        service: String,
        /// The validation failure.
        #[source]
        source: InvalidSamplingRate,
    },

    /// The same service is configured twice.
    #[error("duplicate strategy entry for service {service:?}")]
    DuplicateService {
        /// The duplicated service name.
        service: String,
    },
}

/// On-disk strategies file shape.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrategiesFile {
    #[serde(default)]
    default_strategy: Option<SamplingStrategy>,
    #[serde(default)]
    service_strategies: Vec<ServiceStrategyEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceStrategyEntry {
    service: String,
    strategy: SamplingStrategy,
}

/// Serves per-service strategies loaded from a JSON file, falling back to a
/// default strategy for unlisted services.
///
/// The file is read once at construction; the daemon does not watch it for
/// changes.
#[derive(Debug, Clone)]
pub struct FileStrategyProvider {
    default_strategy: SamplingStrategy,
    per_service: HashMap<String, SamplingStrategy>,
}

impl FileStrategyProvider {
    /// Loads strategies from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails on unreadable or malformed files, out-of-range rates, and
    /// duplicate service entries.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StrategyFileError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| StrategyFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: StrategiesFile =
            serde_json::from_str(&raw).map_err(|source| StrategyFileError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let provider = Self::from_parts(
            file.default_strategy.unwrap_or_default(),
            file.service_strategies
                .into_iter()
                .map(|entry| (entry.service, entry.strategy)),
        )?;
        info!(
            path = %path.display(),
            services = provider.per_service.len(),
            "sampling strategies loaded"
        );
        Ok(provider)
    }

    /// Builds a provider from already-parsed parts.
    ///
    /// # Errors
    ///
    /// Fails on out-of-range rates and duplicate service entries.
    pub fn from_parts(
        default_strategy: SamplingStrategy,
        entries: impl IntoIterator<Item = (String, SamplingStrategy)>,
    ) -> Result<Self, StrategyFileError> {
        default_strategy
            .validate()
            .map_err(|source| StrategyFileError::InvalidStrategy {
                service: "(default)".to_string(),
                source,
            })?;

        let mut per_service = HashMap::new();
        for (service, strategy) in entries {
            strategy
                .validate()
                .map_err(|source| StrategyFileError::InvalidStrategy {
                    service: service.clone(),
                    source,
                })?;
            if per_service.insert(service.clone(), strategy).is_some() {
                return Err(StrategyFileError::DuplicateService { service });
            }
        }

        Ok(Self {
            default_strategy,
            per_service,
        })
    }

    /// Returns the number of per-service overrides.
    #[must_use]
    pub fn override_count(&self) -> usize {
        self.per_service.len()
    }
}

impl StrategyProvider for FileStrategyProvider {
    fn strategy_for(&self, service: &str) -> SamplingStrategy {
        self.per_service
            .get(service)
            .copied()
            .unwrap_or(self.default_strategy)
    }
}
