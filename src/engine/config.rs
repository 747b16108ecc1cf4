//! Engine configuration options.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, MarketConfig};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Gate closure, caps and increments of the market being run.
    pub market: MarketConfig,
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Echo every audit event to the log.
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            max_events: 100_000,
            verbose: false,
        }
    }
}

impl EngineConfig {
    pub fn for_market(market: MarketConfig) -> Self {
        Self {
            market,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events == 0 {
            return Err(ConfigError::InvalidLimit {
                reason: "event log must retain at least one event".to_string(),
            });
        }
        self.market.validate()
    }
}
