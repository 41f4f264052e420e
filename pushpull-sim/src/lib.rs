//! PushPull Sim - Deterministic discrete-event swarm simulator

#![warn(missing_docs)]
//!
//! Runs complete push-pull swarms in one thread. Every client gets service
//! implementations backed by one shared world: a single event queue and
//! clock, a network with latency and per-node uplink bandwidth, an
//! in-process tracker and a collecting metrics log. The same seed always
//! produces the same run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use pushpull_core::ClientConfig;
//! use pushpull_sim::{SimulationConfig, SwarmSimulation};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut swarm = SwarmSimulation::with_synthetic_media(
//!     SimulationConfig::default(),
//!     "clip",
//!     1_048_576,
//!     65_536,
//! )?;
//! swarm.add_client(ClientConfig {
//!     initial_bitfield: "full".to_string(),
//!     ..ClientConfig::default()
//! })?;
//! swarm.add_client(ClientConfig::default())?;
//!
//! let report = swarm.run_until_complete(Duration::from_secs(600))?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod metrics;
pub mod network;
pub mod scenario;
pub mod services;
pub mod state;
pub mod swarm;
pub mod tracker;

pub use config::SimulationConfig;
pub use events::{EventQueue, ScheduledEvent, SimEvent};
pub use metrics::{Announcement, MetricsLog, MetricsRecord};
pub use network::Network;
pub use scenario::{ClientSpec, MediaSpec, Scenario};
pub use state::{SharedState, SimState};
pub use swarm::{SimulationError, SimulationReport, SwarmSimulation};
pub use tracker::Tracker;
