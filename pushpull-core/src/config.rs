//! Client configuration.
//!
//! All tunables of a push-pull client live here. Values are plain data with
//! defaults matching the reference simulator setup, environment overrides
//! for ad-hoc runs, and JSON loading for scenario files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bitfield::FillPolicy;

/// Configuration problems detected before a client starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid initial bitfield '{value}': {reason}")]
    InvalidFillPolicy { value: String, reason: String },

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Invalid JSON configuration")]
    Json(#[from] serde_json::Error),
}

/// Per-client protocol configuration.
///
/// Counts of zero are meaningful only for `max_unchoked_peers`, where zero
/// means unlimited. Durations serialize as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Protocol bundle name, unknown names fall back to `default`
    pub protocol: String,
    /// Initial bitfield fill policy string, see [`FillPolicy`]
    pub initial_bitfield: String,
    /// Port the peer connector listens on
    pub listen_port: u16,
    /// Connections the peer connector tries to maintain
    pub desired_peers: usize,
    /// Hard cap on connections, inbound ones beyond it are refused
    pub max_peers: usize,
    /// Concurrently unchoked peers, 0 = unlimited
    pub max_unchoked_peers: usize,
    /// Outstanding block requests to a single peer
    pub max_requests_per_peer: usize,
    /// Peers concurrently downloading the same piece
    pub max_requests_per_piece: usize,
    /// Outstanding requests for the same block
    pub max_requests_per_block: usize,
    /// Outstanding requests to one peer for one piece
    pub max_requests_per_peer_per_piece: usize,
    /// Size of blocks we request
    pub request_block_size: u32,
    /// Largest block we serve
    pub send_block_size: u32,
    /// Time a peer gets to deliver a requested piece
    #[serde(with = "millis")]
    pub piece_timeout: Duration,
    /// Time to keep seeding after completion, `None` = forever
    #[serde(with = "optional_millis")]
    pub seeding_duration: Option<Duration>,
    /// Join the cloud right after startup
    pub auto_connect: bool,
    /// Verify completed pieces against their SHA-1
    pub check_downloaded_data: bool,
    /// Interval of the periodic metrics gather
    #[serde(with = "millis")]
    pub gather_metrics_period: Duration,
    /// Leading bitfield bytes that must be full for completion, `None` = all
    pub pull_window_bytes: Option<usize>,
    /// Seed for the client's RNG, `None` derives one from the node id
    pub rng_seed: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: "rarest-first".to_string(),
            initial_bitfield: "empty".to_string(),
            listen_port: 6881,
            desired_peers: 30,
            max_peers: 55,
            max_unchoked_peers: 4,
            max_requests_per_peer: 16,
            max_requests_per_piece: 8,
            max_requests_per_block: 1,
            max_requests_per_peer_per_piece: 8,
            request_block_size: 16_384, // 16 KiB
            send_block_size: 16_384,
            piece_timeout: Duration::from_secs(30),
            seeding_duration: None,
            auto_connect: true,
            check_downloaded_data: false,
            gather_metrics_period: Duration::from_secs(60),
            pull_window_bytes: None,
            rng_seed: None,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from defaults with `PUSHPULL_*` overrides.
    ///
    /// Unparsable values are ignored and keep their default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(protocol) = std::env::var("PUSHPULL_PROTOCOL") {
            config.protocol = protocol;
        }

        if let Ok(fill) = std::env::var("PUSHPULL_INITIAL_BITFIELD") {
            config.initial_bitfield = fill;
        }

        if let Ok(peers) = std::env::var("PUSHPULL_DESIRED_PEERS") {
            if let Ok(count) = peers.parse::<usize>() {
                config.desired_peers = count;
            }
        }

        if let Ok(peers) = std::env::var("PUSHPULL_MAX_PEERS") {
            if let Ok(count) = peers.parse::<usize>() {
                config.max_peers = count;
            }
        }

        if let Ok(unchoked) = std::env::var("PUSHPULL_MAX_UNCHOKED_PEERS") {
            if let Ok(count) = unchoked.parse::<usize>() {
                config.max_unchoked_peers = count;
            }
        }

        if let Ok(timeout) = std::env::var("PUSHPULL_PIECE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                config.piece_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(seeding) = std::env::var("PUSHPULL_SEEDING_DURATION_MS") {
            // Negative values mean seeding forever.
            if let Ok(ms) = seeding.parse::<i64>() {
                config.seeding_duration = u64::try_from(ms).ok().map(Duration::from_millis);
            }
        }

        if let Ok(auto_connect) = std::env::var("PUSHPULL_AUTO_CONNECT") {
            config.auto_connect = auto_connect.parse().unwrap_or(config.auto_connect);
        }

        if let Ok(check) = std::env::var("PUSHPULL_CHECK_DOWNLOADED_DATA") {
            config.check_downloaded_data = check.parse().unwrap_or(false);
        }

        if let Ok(seed) = std::env::var("PUSHPULL_SEED") {
            if let Ok(seed_value) = seed.parse::<u64>() {
                config.rng_seed = Some(seed_value);
            }
        }

        config
    }

    /// Small, fast settings for unit and swarm tests.
    pub fn for_testing() -> Self {
        Self {
            desired_peers: 8,
            max_peers: 16,
            request_block_size: 1_024,
            send_block_size: 1_024,
            piece_timeout: Duration::from_secs(5),
            gather_metrics_period: Duration::from_secs(10),
            rng_seed: Some(0x5eed),
            ..Default::default()
        }
    }

    /// Parses a (possibly partial) JSON configuration; missing keys keep defaults.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Json` - Input is not valid JSON for this structure
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses the initial bitfield policy.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidFillPolicy` - Policy string cannot be parsed
    pub fn fill_policy(&self) -> Result<FillPolicy, ConfigError> {
        self.initial_bitfield.parse()
    }

    /// Checks values that would make the client misbehave.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidValue` - A block size, timeout or period is zero
    /// - `ConfigError::InvalidFillPolicy` - Initial bitfield cannot be parsed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_block_size == 0 {
            return Err(Self::zero("request_block_size"));
        }
        if self.send_block_size == 0 {
            return Err(Self::zero("send_block_size"));
        }
        if self.piece_timeout.is_zero() {
            return Err(Self::zero("piece_timeout"));
        }
        if self.gather_metrics_period.is_zero() {
            return Err(Self::zero("gather_metrics_period"));
        }
        self.fill_policy()?;
        Ok(())
    }

    fn zero(name: &'static str) -> ConfigError {
        ConfigError::InvalidValue {
            name,
            reason: "must be greater than zero".to_string(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// - `S::Error` - Serializer rejects the value
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// # Errors
    ///
    /// - `D::Error` - Input is not an unsigned millisecond count
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// - `S::Error` - Serializer rejects the value
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    ///
    /// - `D::Error` - Input is neither null nor a millisecond count
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = ClientConfig::default();

        assert_eq!(config.protocol, "rarest-first");
        assert_eq!(config.initial_bitfield, "empty");
        assert_eq!(config.desired_peers, 30);
        assert_eq!(config.max_peers, 55);
        assert_eq!(config.max_unchoked_peers, 4);
        assert_eq!(config.max_requests_per_peer, 16);
        assert_eq!(config.max_requests_per_block, 1);
        assert_eq!(config.request_block_size, 16_384);
        assert_eq!(config.piece_timeout, Duration::from_secs(30));
        assert_eq!(config.seeding_duration, None);
        assert!(config.auto_connect);
        assert!(!config.check_downloaded_data);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_block_size() {
        let config = ClientConfig {
            send_block_size: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                name: "send_block_size",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_fill_policy() {
        let config = ClientConfig {
            initial_bitfield: "random:lots".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFillPolicy { .. })
        ));
    }

    #[test]
    fn test_from_json_partial_keeps_defaults() {
        let config = ClientConfig::from_json(
            r#"{"protocol": "default", "piece_timeout": 2500, "seeding_duration": 60000}"#,
        )
        .unwrap();

        assert_eq!(config.protocol, "default");
        assert_eq!(config.piece_timeout, Duration::from_millis(2_500));
        assert_eq!(config.seeding_duration, Some(Duration::from_secs(60)));
        assert_eq!(config.max_peers, 55);
    }

    #[test]
    fn test_json_roundtrip_preserves_config() {
        let config = ClientConfig::for_testing();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ClientConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            ClientConfig::from_json("{not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("PUSHPULL_PROTOCOL", "give-to-get");
            std::env::set_var("PUSHPULL_MAX_UNCHOKED_PEERS", "0");
            std::env::set_var("PUSHPULL_SEEDING_DURATION_MS", "-1");
            std::env::set_var("PUSHPULL_SEED", "99");
        }

        let config = ClientConfig::from_env();

        assert_eq!(config.protocol, "give-to-get");
        assert_eq!(config.max_unchoked_peers, 0);
        assert_eq!(config.seeding_duration, None);
        assert_eq!(config.rng_seed, Some(99));

        unsafe {
            std::env::remove_var("PUSHPULL_PROTOCOL");
            std::env::remove_var("PUSHPULL_MAX_UNCHOKED_PEERS");
            std::env::remove_var("PUSHPULL_SEEDING_DURATION_MS");
            std::env::remove_var("PUSHPULL_SEED");
        }
    }
}
