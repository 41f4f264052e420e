//! Swarm driver: owns the clients and routes events to them.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use pushpull_core::{
    Client, ClientConfig, ClientError, ClientId, MediaData, MediaError, NodeInfo, PlaybackEvent,
    SyntheticContent,
};

use crate::config::SimulationConfig;
use crate::events::SimEvent;
use crate::metrics::MetricsLog;
use crate::services::node_services;
use crate::state::{SharedState, SimState};

/// Errors that abort a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// A client refused to be created or started
    #[error("Client {id} failed")]
    Client {
        /// Node of the failing client
        id: ClientId,
        /// What the client reported
        #[source]
        source: ClientError,
    },

    /// An event or call named a client that does not exist
    #[error("Unknown client {id}")]
    UnknownClient {
        /// Requested node
        id: ClientId,
    },

    /// The run processed more events than allowed
    #[error("Event limit exceeded: {count} events processed")]
    EventLimitExceeded {
        /// Events processed when the limit hit
        count: u64,
    },

    /// Scenario file could not be parsed
    #[error("Invalid scenario: {0}")]
    Json(#[from] serde_json::Error),

    /// Shared media could not be built
    #[error("Media error: {0}")]
    Media(#[from] MediaError),
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    /// Seed used for reproduction
    pub seed: u64,
    /// Simulation time when the run stopped
    pub elapsed: Duration,
    /// Events delivered during the run
    pub events_processed: u64,
    /// Delivered events per kind
    pub events_by_kind: BTreeMap<&'static str, u64>,
    /// Clients holding their whole completion window
    pub completed: Vec<ClientId>,
    /// Clients still downloading
    pub pending: Vec<ClientId>,
}

impl SimulationReport {
    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Swarm Report (seed: {})\n", self.seed));
        summary.push_str(&format!("Elapsed: {:?}\n", self.elapsed));
        summary.push_str(&format!("Events processed: {}\n", self.events_processed));
        summary.push_str(&format!(
            "Completed: {} / {}\n",
            self.completed.len(),
            self.completed.len() + self.pending.len()
        ));
        summary.push_str("\nEvent breakdown:\n");
        for (kind, count) in &self.events_by_kind {
            summary.push_str(&format!("  {kind}: {count}\n"));
        }
        summary
    }
}

/// A set of clients sharing one content over a simulated network.
pub struct SwarmSimulation {
    config: SimulationConfig,
    media: Arc<MediaData>,
    clients: BTreeMap<ClientId, Client>,
    state: SharedState,
    next_client: u32,
    events_processed: u64,
    events_by_kind: BTreeMap<&'static str, u64>,
}

impl SwarmSimulation {
    /// Creates an empty swarm sharing `media`.
    pub fn new(config: SimulationConfig, media: Arc<MediaData>) -> Self {
        let state = Rc::new(RefCell::new(SimState::new(&config)));
        Self {
            config,
            media,
            clients: BTreeMap::new(),
            state,
            next_client: 1,
            events_processed: 0,
            events_by_kind: BTreeMap::new(),
        }
    }

    /// Creates an empty swarm around synthetic content generated from the
    /// configured content seed.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Media` - Zero file or piece length
    pub fn with_synthetic_media(
        config: SimulationConfig,
        name: &str,
        file_length: u64,
        piece_length: u32,
    ) -> Result<Self, SimulationError> {
        let content = SyntheticContent::new(config.content_seed);
        let media = MediaData::synthesize(name, file_length, piece_length, &content)?;
        Ok(Self::new(config, Arc::new(media)))
    }

    /// Adds a client that starts immediately.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Client` - Configuration fails validation
    pub fn add_client(&mut self, config: ClientConfig) -> Result<ClientId, SimulationError> {
        self.add_client_at(Duration::ZERO, config)
    }

    /// Adds a client that starts after `delay`.
    ///
    /// Nodes get ids from 1 upwards and addresses `10.a.b.c` derived from
    /// the id.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Client` - Configuration fails validation
    pub fn add_client_at(
        &mut self,
        delay: Duration,
        config: ClientConfig,
    ) -> Result<ClientId, SimulationError> {
        let id = ClientId(self.next_client);
        let [_, a, b, c] = id.0.to_be_bytes();
        let ip = IpAddr::V4(Ipv4Addr::new(10, a, b, c));
        let services = node_services(&self.state, id, self.config.content_seed);
        let client = Client::new(NodeInfo { id, ip }, config, Arc::clone(&self.media), services)
            .map_err(|source| SimulationError::Client { id, source })?;

        self.next_client += 1;
        {
            let mut state = self.state.borrow_mut();
            state.network.add_node(id, ip);
            state.schedule_in(delay, SimEvent::Start { client: id });
        }
        self.clients.insert(id, client);
        tracing::debug!(node = %id, %ip, ?delay, "Client added");
        Ok(id)
    }

    /// Delivers a playback event to `client` after `delay`.
    ///
    /// # Errors
    ///
    /// - `SimulationError::UnknownClient` - No such client
    pub fn schedule_playback(
        &mut self,
        client: ClientId,
        delay: Duration,
        event: PlaybackEvent,
    ) -> Result<(), SimulationError> {
        if !self.clients.contains_key(&client) {
            return Err(SimulationError::UnknownClient { id: client });
        }
        self.state
            .borrow_mut()
            .schedule_in(delay, SimEvent::Playback { client, event });
        Ok(())
    }

    /// Processes every event due up to `deadline`, then moves the clock to
    /// `deadline`.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Client` - A client failed to start
    /// - `SimulationError::EventLimitExceeded` - `max_events` reached
    pub fn run_until(&mut self, deadline: Duration) -> Result<SimulationReport, SimulationError> {
        while self.step(deadline)? {}
        self.state.borrow_mut().advance_to(deadline);
        Ok(self.report())
    }

    /// Processes events until every client completed or `deadline` passed.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Client` - A client failed to start
    /// - `SimulationError::EventLimitExceeded` - `max_events` reached
    pub fn run_until_complete(
        &mut self,
        deadline: Duration,
    ) -> Result<SimulationReport, SimulationError> {
        while !self.all_completed() && self.step(deadline)? {}
        Ok(self.report())
    }

    /// Delivers the next due event. Returns false when none is left.
    fn step(&mut self, deadline: Duration) -> Result<bool, SimulationError> {
        let next = self.state.borrow_mut().next_event(deadline);
        let Some(scheduled) = next else {
            return Ok(false);
        };
        self.events_processed += 1;
        if self.events_processed > self.config.max_events {
            return Err(SimulationError::EventLimitExceeded {
                count: self.events_processed,
            });
        }
        *self
            .events_by_kind
            .entry(scheduled.event.as_str())
            .or_default() += 1;
        self.dispatch(scheduled.event)?;
        Ok(true)
    }

    fn dispatch(&mut self, event: SimEvent) -> Result<(), SimulationError> {
        let id = event.client();
        let client = self
            .clients
            .get_mut(&id)
            .ok_or(SimulationError::UnknownClient { id })?;
        match event {
            SimEvent::Start { .. } => client
                .start()
                .map_err(|source| SimulationError::Client { id, source })?,
            SimEvent::Timer { timer, .. } => client.handle_timer(timer),
            SimEvent::ConnectionEstablished {
                peer,
                remote,
                direction,
                ..
            } => client.handle_connection_established(peer, remote, direction),
            SimEvent::ConnectionFailed { peer, .. } => client.handle_connection_failed(peer),
            SimEvent::ConnectionClosed { peer, .. } => client.handle_connection_closed(peer),
            SimEvent::DataReceived { peer, data, .. } => client.handle_data_received(peer, &data),
            SimEvent::TrackerResponse { response, .. } => client.handle_tracker_response(response),
            SimEvent::Playback { event, .. } => client.handle_playback_event(event),
        }
        Ok(())
    }

    /// Whether every client holds its whole completion window.
    pub fn all_completed(&self) -> bool {
        self.clients.values().all(Client::is_download_completed)
    }

    /// Snapshot of the run so far.
    pub fn report(&self) -> SimulationReport {
        let (completed, pending): (Vec<ClientId>, Vec<ClientId>) = self
            .clients
            .keys()
            .partition(|id| self.clients[*id].is_download_completed());
        SimulationReport {
            seed: self.config.seed,
            elapsed: self.now(),
            events_processed: self.events_processed,
            events_by_kind: self.events_by_kind.clone(),
            completed,
            pending,
        }
    }

    /// A client by id.
    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// A client by id, for runtime changes between runs.
    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    /// Ids of all clients, ascending.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Shared content metadata.
    pub fn media(&self) -> &Arc<MediaData> {
        &self.media
    }

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.state.borrow().now()
    }

    /// Tracker members of the shared content.
    pub fn cloud_members(&self) -> Vec<ClientId> {
        self.state.borrow().tracker.members(self.media.info_hash())
    }

    /// Tracker seeders of the shared content.
    pub fn cloud_seeders(&self) -> Vec<ClientId> {
        self.state.borrow().tracker.seeders(self.media.info_hash())
    }

    /// Announcements and metrics collected so far.
    pub fn metrics(&self) -> Ref<'_, MetricsLog> {
        Ref::map(self.state.borrow(), |state| &state.metrics)
    }

    /// Total bytes sent over the network.
    pub fn bytes_sent(&self) -> u64 {
        self.state.borrow().network.bytes_sent()
    }
}
