//! JSON scenario files describing a whole swarm.
//!
//! ```json
//! {
//!   "simulation": { "seed": 3, "latency_ms": 20 },
//!   "media": { "name": "clip", "file_length": 65536, "piece_length": 16384 },
//!   "clients": [
//!     { "start_ms": 0, "config": { "initial_bitfield": "full" } },
//!     { "start_ms": 500, "config": { "protocol": "default" } }
//!   ]
//! }
//! ```

use std::time::Duration;

use pushpull_core::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::swarm::{SimulationError, SwarmSimulation};

/// Synthetic content shared by the swarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSpec {
    /// Content name
    pub name: String,
    /// Total content length in bytes
    pub file_length: u64,
    /// Nominal piece length in bytes
    pub piece_length: u32,
}

/// One client and when it starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSpec {
    /// Start delay in milliseconds
    #[serde(default)]
    pub start_ms: u64,
    /// Client settings; missing keys keep defaults
    #[serde(default)]
    pub config: ClientConfig,
}

/// Complete swarm description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Network and run settings
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Shared content
    pub media: MediaSpec,
    /// Clients in node id order
    #[serde(default)]
    pub clients: Vec<ClientSpec>,
}

impl Scenario {
    /// Parses a scenario.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Json` - Input is not a valid scenario
    pub fn from_json(json: &str) -> Result<Self, SimulationError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds the swarm with every client added and scheduled.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Media` - Zero file or piece length
    /// - `SimulationError::Client` - A client configuration is invalid
    pub fn build(self) -> Result<SwarmSimulation, SimulationError> {
        let mut swarm = SwarmSimulation::with_synthetic_media(
            self.simulation,
            &self.media.name,
            self.media.file_length,
            self.media.piece_length,
        )?;
        for client in self.clients {
            swarm.add_client_at(Duration::from_millis(client.start_ms), client.config)?;
        }
        Ok(swarm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "simulation": { "seed": 3 },
        "media": { "name": "clip", "file_length": 4000, "piece_length": 1000 },
        "clients": [
            { "config": { "initial_bitfield": "full", "listen_port": 7000 } },
            { "start_ms": 500, "config": { "protocol": "default" } }
        ]
    }"#;

    #[test]
    fn test_scenario_builds_scheduled_clients() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        assert_eq!(scenario.simulation.seed, 3);
        assert_eq!(scenario.simulation.latency_ms, 50);

        let swarm = scenario.build().unwrap();

        assert_eq!(swarm.client_ids().len(), 2);
        assert_eq!(swarm.media().piece_count(), 4);
        let seeder = swarm.client_ids()[0];
        assert_eq!(swarm.client(seeder).unwrap().config().listen_port, 7000);
    }

    #[test]
    fn test_scenario_requires_media() {
        assert!(matches!(
            Scenario::from_json(r#"{ "clients": [] }"#),
            Err(SimulationError::Json(_))
        ));
    }

    #[test]
    fn test_scenario_rejects_empty_media() {
        let json = r#"{ "media": { "name": "clip", "file_length": 0, "piece_length": 1000 } }"#;
        let scenario = Scenario::from_json(json).unwrap();
        assert!(matches!(scenario.build(), Err(SimulationError::Media(_))));
    }
}
