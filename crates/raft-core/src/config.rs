//! # config
//!
//! why: timing and sizing knobs of a replica, loadable from json
//! relations: read by RaftNode (cache sizing), the role handlers (batch size) and raft-server (timers)
//! what: RaftConfig, validation, randomized election timeout

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for raft timing and sizing.
///
/// All durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Minimum election timeout (default: 150ms)
    pub election_timeout_min: u64,
    /// Maximum election timeout (default: 300ms)
    pub election_timeout_max: u64,
    /// Interval between leader heartbeats (default: 50ms)
    pub heartbeat_interval: u64,
    /// Largest number of entries carried by one AppendEntries request
    pub max_append_batch: usize,
    /// In-flight cache capacity in entries; 0 disables the cache
    pub in_flight_max_entries: usize,
    /// In-flight cache capacity in content bytes
    pub in_flight_max_bytes: usize,
    /// Run a pre-vote round before bumping the term on election timeout
    pub pre_vote: bool,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            max_append_batch: 64,
            in_flight_max_entries: 1024,
            in_flight_max_bytes: 8 * 1024 * 1024,
            pre_vote: false,
        }
    }
}

impl RaftConfig {
    /// Parse a (possibly partial) json document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(ConfigError::ElectionTimeoutRange {
                min: self.election_timeout_min,
                max: self.election_timeout_max,
            });
        }
        // a caught-up follower only hears from the leader every other heartbeat
        if self.heartbeat_interval.saturating_mul(2) >= self.election_timeout_min {
            return Err(ConfigError::HeartbeatTooSlow {
                heartbeat: self.heartbeat_interval,
                election_min: self.election_timeout_min,
            });
        }
        if self.max_append_batch == 0 {
            return Err(ConfigError::ZeroAppendBatch);
        }
        Ok(())
    }

    pub fn with_election_timeout(mut self, min: u64, max: u64) -> Self {
        self.election_timeout_min = min;
        self.election_timeout_max = max;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: u64) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_append_batch(mut self, batch: usize) -> Self {
        self.max_append_batch = batch;
        self
    }

    pub fn with_in_flight_cache(mut self, max_entries: usize, max_bytes: usize) -> Self {
        self.in_flight_max_entries = max_entries;
        self.in_flight_max_bytes = max_bytes;
        self
    }

    pub fn with_pre_vote(mut self, enabled: bool) -> Self {
        self.pre_vote = enabled;
        self
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    /// A fresh timeout drawn uniformly from the configured range.
    pub fn random_election_timeout(&self) -> Duration {
        let ms = rand::rng().random_range(self.election_timeout_min..=self.election_timeout_max);
        Duration::from_millis(ms)
    }
}
