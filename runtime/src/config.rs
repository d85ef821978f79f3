//! Engine configuration.

use chrono::Duration;
use thiserror::Error;

/// Invalid engine configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Counter-offers must lapse sooner than standard offers.
    #[error("counter-offer window ({counter}) must be shorter than the standard offer window ({standard})")]
    CounterWindowTooLong {
        /// Configured standard window
        standard: Duration,
        /// Configured counter window
        counter: Duration,
    },

    /// A window must be positive.
    #[error("offer windows must be positive")]
    NonPositiveWindow,

    /// Sweep batch and page sizes must be at least one.
    #[error("{0} must be at least 1")]
    ZeroSize(&'static str),
}

/// Tunables for the negotiation engine and its sweeper.
///
/// # Default Values
///
/// - `standard_offer_window`: 24 hours
/// - `counter_offer_window`: 12 hours
/// - `sweep_interval`: 60 seconds
/// - `sweep_batch_size`: 500
/// - `default_page_size`: 20
/// - `max_page_size`: 100
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a buyer offer stays open
    pub standard_offer_window: Duration,
    /// How long a seller counter-offer stays open
    pub counter_offer_window: Duration,
    /// Time between sweeper passes
    pub sweep_interval: std::time::Duration,
    /// Records fetched per sweeper batch
    pub sweep_batch_size: u32,
    /// Page size when a listing does not specify one
    pub default_page_size: u32,
    /// Upper bound on any listing page
    pub max_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            standard_offer_window: Duration::hours(24),
            counter_offer_window: Duration::hours(12),
            sweep_interval: std::time::Duration::from_secs(60),
            sweep_batch_size: 500,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl EngineConfig {
    /// Check the configuration is coherent.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NonPositiveWindow`] if either window is zero or negative
    /// - [`ConfigError::CounterWindowTooLong`] if counters do not lapse sooner
    /// - [`ConfigError::ZeroSize`] for a zero batch or page size
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.standard_offer_window <= Duration::zero()
            || self.counter_offer_window <= Duration::zero()
        {
            return Err(ConfigError::NonPositiveWindow);
        }
        if self.counter_offer_window >= self.standard_offer_window {
            return Err(ConfigError::CounterWindowTooLong {
                standard: self.standard_offer_window,
                counter: self.counter_offer_window,
            });
        }
        if self.sweep_batch_size == 0 {
            return Err(ConfigError::ZeroSize("sweep_batch_size"));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(ConfigError::ZeroSize("page size"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn counter_window_must_be_shorter() {
        let config = EngineConfig {
            counter_offer_window: Duration::hours(24),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CounterWindowTooLong { .. })
        ));
    }

    #[test]
    fn zero_batch_is_rejected() {
        let config = EngineConfig {
            sweep_batch_size: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroSize("sweep_batch_size"))
        );
    }
}
