//! Simulation-wide settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Network, tracker and run limits shared by every simulated node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed of the simulation RNG (tracker peer shuffling)
    pub seed: u64,
    /// One-way link latency between any two nodes
    pub latency_ms: u64,
    /// Per-node uplink capacity; 0 means unlimited
    pub uplink_bytes_per_sec: u64,
    /// Delay between a tracker join and its response
    pub tracker_latency_ms: u64,
    /// Maximum peers handed out per tracker response
    pub tracker_peer_limit: usize,
    /// Hard cap on processed events per run
    pub max_events: u64,
    /// Seed of the synthetic content every node serves
    pub content_seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            latency_ms: 50,
            uplink_bytes_per_sec: 1_000_000, // 1 MB/s
            tracker_latency_ms: 100,
            tracker_peer_limit: 50,
            max_events: 10_000_000,
            content_seed: 7,
        }
    }
}

impl SimulationConfig {
    /// Small swarm settings for fast tests.
    pub fn for_testing() -> Self {
        Self {
            seed: 0x5eed,
            latency_ms: 10,
            uplink_bytes_per_sec: 0,
            tracker_latency_ms: 20,
            max_events: 1_000_000,
            ..Default::default()
        }
    }

    /// Loads settings from defaults with `PUSHPULL_SIM_*` overrides.
    ///
    /// Unparsable values are ignored and keep their default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(seed) = std::env::var("PUSHPULL_SIM_SEED") {
            if let Ok(seed_value) = seed.parse::<u64>() {
                config.seed = seed_value;
            }
        }

        if let Ok(latency) = std::env::var("PUSHPULL_SIM_LATENCY_MS") {
            if let Ok(ms) = latency.parse::<u64>() {
                config.latency_ms = ms;
            }
        }

        if let Ok(uplink) = std::env::var("PUSHPULL_SIM_UPLINK_BPS") {
            if let Ok(rate) = uplink.parse::<u64>() {
                config.uplink_bytes_per_sec = rate;
            }
        }

        config
    }

    /// Parses a (possibly partial) JSON configuration.
    ///
    /// # Errors
    ///
    /// - `serde_json::Error` - Input is not valid JSON for this structure
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Link latency as a duration.
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Tracker response delay as a duration.
    pub fn tracker_latency(&self) -> Duration {
        Duration::from_millis(self.tracker_latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SimulationConfig::from_json(r#"{"seed": 9, "latency_ms": 5}"#).unwrap();
        assert_eq!(config.seed, 9);
        assert_eq!(config.latency(), Duration::from_millis(5));
        assert_eq!(config.tracker_peer_limit, 50);
    }

    #[test]
    fn test_testing_profile_has_unlimited_uplink() {
        let config = SimulationConfig::for_testing();
        assert_eq!(config.uplink_bytes_per_sec, 0);
        assert!(config.tracker_latency() > config.latency());
    }
}
