//! Sampling strategy schema served by the control plane.
//!
//! Client libraries poll the daemon's control plane for the strategy their
//! service should apply when deciding whether to record a trace. The daemon
//! only stores and serves strategies; it never evaluates them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default probabilistic sampling rate applied when no strategy is
/// configured for a service (1 in 1000 traces).
pub const DEFAULT_SAMPLING_RATE: f64 = 0.001;

/// A sampling rate outside the closed unit interval.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[error("sampling rate {rate} outside [0.0, 1.0]")]
pub struct InvalidSamplingRate {
    /// The rejected rate.
    pub rate: f64,
}

/// The sampling decision policy a client should apply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Sample each trace independently with the given probability.
    Probabilistic {
        /// Probability in `[0.0, 1.0]`.
        sampling_rate: f64,
    },

    /// Sample at most the given number of traces per second.
    RateLimiting {
        /// Upper bound on sampled traces per second.
        max_traces_per_second: u32,
    },
}

impl SamplingStrategy {
    /// Creates a probabilistic strategy, validating the rate.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSamplingRate`] if `rate` is not a finite value in
    /// `[0.0, 1.0]`.
    pub fn probabilistic(rate: f64) -> Result<Self, InvalidSamplingRate> {
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(InvalidSamplingRate { rate });
        }
        Ok(Self::Probabilistic {
            sampling_rate: rate,
        })
    }

    /// Creates a rate-limiting strategy.
    #[must_use]
    pub const fn rate_limiting(max_traces_per_second: u32) -> Self {
        Self::RateLimiting {
            max_traces_per_second,
        }
    }

    /// Validates a deserialized strategy.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSamplingRate`] for an out-of-range probabilistic
    /// rate. Rate-limiting strategies are always valid.
    pub fn validate(&self) -> Result<(), InvalidSamplingRate> {
        match *self {
            Self::Probabilistic { sampling_rate } => {
                if !sampling_rate.is_finite() || !(0.0..=1.0).contains(&sampling_rate) {
                    return Err(InvalidSamplingRate {
                        rate: sampling_rate,
                    });
                }
                Ok(())
            }
            Self::RateLimiting { .. } => Ok(()),
        }
    }
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::Probabilistic {
            sampling_rate: DEFAULT_SAMPLING_RATE,
        }
    }
}

/// Control-plane response body for a sampling strategy query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResponse {
    /// The service the strategy applies to.
    pub service: String,

    /// The strategy itself.
    pub strategy: SamplingStrategy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probabilistic_rate_validation() {
        assert!(SamplingStrategy::probabilistic(0.0).is_ok());
        assert!(SamplingStrategy::probabilistic(1.0).is_ok());
        assert_eq!(
            SamplingStrategy::probabilistic(1.5),
            Err(InvalidSamplingRate { rate: 1.5 })
        );
        assert_eq!(
            SamplingStrategy::probabilistic(-0.1),
            Err(InvalidSamplingRate { rate: -0.1 })
        );
        assert!(SamplingStrategy::probabilistic(f64::NAN).is_err());
    }

    #[test]
    fn test_default_strategy_uses_default_rate() {
        let SamplingStrategy::Probabilistic { sampling_rate } = SamplingStrategy::default() else {
            panic!("default strategy should be probabilistic");
        };
        assert!((sampling_rate - DEFAULT_SAMPLING_RATE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_deserialized_strategy() {
        let ok: SamplingStrategy =
            serde_json::from_str(r#"{"type": "probabilistic", "sampling_rate": 0.25}"#)
                .expect("deserialize");
        assert!(ok.validate().is_ok());

        let bad: SamplingStrategy =
            serde_json::from_str(r#"{"type": "probabilistic", "sampling_rate": 2.0}"#)
                .expect("deserialize");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_wire_shape_is_tagged() {
        let json = serde_json::to_string(&SamplingStrategy::rate_limiting(50)).expect("serialize");
        assert_eq!(
            json,
            r#"{"type":"rate_limiting","max_traces_per_second":50}"#
        );
    }

    #[test]
    fn test_unknown_strategy_type_rejected() {
        let result: Result<SamplingStrategy, _> =
            serde_json::from_str(r#"{"type": "adaptive", "sampling_rate": 0.5}"#);
        assert!(result.is_err());
    }
}
