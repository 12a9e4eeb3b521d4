//! Pair cache configuration
//!
//! Parsed from a JSON params value, with every field defaulted, so an
//! embedder can pass `{}` and get the standard behaviour.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PairError;

/// Policy for shared pair streams held by a [`SharedStreamCache`](crate::pair::SharedStreamCache).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairCacheConfig {
    /// Replay the latest value to subscribers that join a running entry.
    pub replay_latest: bool,
    /// Tear an entry down after it has had zero subscribers for this long.
    /// `None` keeps entries alive until the upstream terminates.
    pub idle_timeout_ms: Option<u64>,
    /// Per-entry broadcast buffer. Slow subscribers that fall further behind
    /// skip ahead to the newest values.
    pub channel_capacity: usize,
}

impl Default for PairCacheConfig {
    fn default() -> Self {
        Self {
            replay_latest: true,
            idle_timeout_ms: None,
            channel_capacity: 64,
        }
    }
}

impl PairCacheConfig {
    /// Parse and validate a config from JSON params.
    pub fn from_params(params: &serde_json::Value) -> Result<Self, PairError> {
        let config: Self = serde_json::from_value(params.clone())
            .map_err(|e| PairError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PairError> {
        if self.channel_capacity == 0 {
            return Err(PairError::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}
