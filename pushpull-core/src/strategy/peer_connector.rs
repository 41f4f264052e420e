//! Peer connector: listening, cloud membership and connection upkeep.

use std::cell::RefCell;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::rc::Rc;

use super::{Strategy, StrategyKind};
use crate::client::Client;
use crate::peers::PeerKey;
use crate::services::{TrackerResponse, TransportError};

#[derive(Debug, Default)]
struct ConnectorState {
    /// Tracker-supplied addresses in arrival order
    candidates: Vec<SocketAddr>,
    /// Addresses we already dialed since joining
    tried: HashSet<SocketAddr>,
}

/// Keeps a client connected to `desired_peers` peers of its cloud.
///
/// Cheap to clone; clones share state. The client keeps one clone as its
/// cloud hooks, the bundle keeps another.
#[derive(Debug, Clone, Default)]
pub struct PeerConnectorStrategy {
    state: Rc<RefCell<ConnectorState>>,
}

impl PeerConnectorStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listens on the configured port.
    ///
    /// # Errors
    ///
    /// - `TransportError::PortInUse` - Another listener owns the port
    pub fn start_listening(&self, client: &mut Client) -> Result<(), TransportError> {
        let port = client.config().listen_port;
        client.services_mut().transport.listen(port)?;
        tracing::debug!(node = %client.id(), port, "Listening");
        Ok(())
    }

    /// Joins the tracker; peers arrive as tracker responses.
    pub fn connect_to_cloud(&self, client: &mut Client) {
        if client.is_cloud_joined() {
            return;
        }
        client.set_cloud_joined(true);
        let announce = client.cloud_announce();
        client.services_mut().cloud.join(&announce);
        tracing::info!(node = %client.id(), "Joined cloud");
    }

    /// Leaves the tracker and closes every connection.
    pub fn disconnect_from_cloud(&self, client: &mut Client) {
        if !client.is_cloud_joined() {
            return;
        }
        client.set_cloud_joined(false);
        let announce = client.cloud_announce();
        client.services_mut().cloud.leave(&announce);
        {
            let mut state = self.state.borrow_mut();
            state.candidates.clear();
            state.tried.clear();
        }
        let closed = client.disconnect_peers(usize::MAX);
        tracing::info!(node = %client.id(), closed, "Left cloud");
    }

    /// Tells the tracker the client now seeds.
    pub fn announce_as_seeder(&self, client: &mut Client) {
        let announce = client.cloud_announce();
        client.services_mut().cloud.announce_seeder(&announce);
    }

    /// Dials up to `count` candidates not tried yet. Returns how many
    /// connections were started.
    pub fn connect_to_peers(&self, client: &mut Client, count: usize) -> usize {
        let untried: Vec<SocketAddr> = {
            let state = self.state.borrow();
            state
                .candidates
                .iter()
                .filter(|address| !state.tried.contains(address))
                .copied()
                .collect()
        };
        let mut started = 0;
        for address in untried {
            if started >= count {
                break;
            }
            if self.connect_to_peer(client, address).is_some() {
                started += 1;
            }
        }
        started
    }

    /// Dials `address` unless it is the client itself, already connected,
    /// or the client is at `max_peers`.
    pub fn connect_to_peer(&self, client: &mut Client, address: SocketAddr) -> Option<PeerKey> {
        if address == client.address() || client.peers().contains_address(address) {
            return None;
        }
        if client.peer_count() >= client.config().max_peers {
            return None;
        }
        self.state.borrow_mut().tried.insert(address);
        Some(client.open_connection(address))
    }

    /// Candidates remembered from tracker responses.
    pub fn candidates(&self) -> Vec<SocketAddr> {
        self.state.borrow().candidates.clone()
    }

    fn remember(&self, response: &TrackerResponse) {
        let mut state = self.state.borrow_mut();
        for address in &response.peers {
            if !state.candidates.contains(address) {
                state.candidates.push(*address);
            }
        }
    }

    /// Tops connections up to `desired_peers` while joined.
    fn replenish(&self, client: &mut Client) {
        if !client.is_cloud_joined() {
            return;
        }
        let wanted = client
            .config()
            .desired_peers
            .saturating_sub(client.peer_count());
        if wanted > 0 {
            self.connect_to_peers(client, wanted);
        }
    }
}

impl Strategy for PeerConnectorStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PeerConnector
    }

    fn initialize(&mut self, client: &mut Client) {
        let events = client.events_mut();

        let connector = self.clone();
        events
            .tracker_response_received
            .subscribe(move |client, response: &TrackerResponse| {
                connector.remember(response);
                connector.replenish(client);
            });

        let connector = self.clone();
        events
            .peer_closed
            .subscribe(move |client, _: &PeerKey| connector.replenish(client));

        let connector = self.clone();
        events
            .peer_connect_failed
            .subscribe(move |client, _: &PeerKey| connector.replenish(client));
    }
}
