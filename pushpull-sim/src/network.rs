//! Simulated links between nodes.
//!
//! Every message takes the configured one-way latency. Each node has one
//! FIFO uplink shared by all its connections, so a large upload delays
//! whatever the node sends after it. Connection keys are unique across the
//! whole network and never reused.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use pushpull_core::{ClientId, PeerDirection, PeerKey, TransportError};

use crate::config::SimulationConfig;
use crate::events::{EventQueue, SimEvent};

/// The other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Endpoint {
    client: ClientId,
    key: PeerKey,
}

/// Addresses, listeners, open connections and uplink occupancy.
#[derive(Debug)]
pub struct Network {
    latency: Duration,
    uplink_bytes_per_sec: u64,
    ips: HashMap<ClientId, IpAddr>,
    listeners: HashMap<SocketAddr, ClientId>,
    listen_addresses: HashMap<ClientId, SocketAddr>,
    endpoints: HashMap<(ClientId, PeerKey), Endpoint>,
    uplink_free_at: HashMap<ClientId, Duration>,
    next_key: u64,
    bytes_sent: u64,
}

impl Network {
    /// Creates an empty network with the configured link properties.
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            latency: config.latency(),
            uplink_bytes_per_sec: config.uplink_bytes_per_sec,
            ips: HashMap::new(),
            listeners: HashMap::new(),
            listen_addresses: HashMap::new(),
            endpoints: HashMap::new(),
            uplink_free_at: HashMap::new(),
            next_key: 1,
            bytes_sent: 0,
        }
    }

    /// Places a node at `ip`.
    pub fn add_node(&mut self, client: ClientId, ip: IpAddr) {
        self.ips.insert(client, ip);
    }

    /// Address of a node, if placed.
    pub fn ip_of(&self, client: ClientId) -> Option<IpAddr> {
        self.ips.get(&client).copied()
    }

    /// Accepts inbound connections for `client` on `port`.
    ///
    /// # Errors
    ///
    /// - `TransportError::PortInUse` - The address already has a listener
    pub fn listen(&mut self, client: ClientId, port: u16) -> Result<(), TransportError> {
        let ip = self.ips.get(&client).copied().unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let address = SocketAddr::new(ip, port);
        if self.listeners.contains_key(&address) {
            return Err(TransportError::PortInUse { port });
        }
        self.listeners.insert(address, client);
        self.listen_addresses.insert(client, address);
        Ok(())
    }

    /// Starts a connection from `client` to `address`.
    ///
    /// Both ends learn the outcome after one latency: the acceptor first,
    /// then the initiator. Without a listener only the initiator hears back.
    pub fn connect(
        &mut self,
        queue: &mut EventQueue,
        now: Duration,
        client: ClientId,
        address: SocketAddr,
    ) -> PeerKey {
        let key = self.allocate_key();
        let at = now + self.latency;
        let Some(&acceptor) = self.listeners.get(&address) else {
            tracing::debug!(node = %client, %address, "No listener");
            queue.push(at, SimEvent::ConnectionFailed { client, peer: key });
            return key;
        };

        let remote_key = self.allocate_key();
        self.endpoints.insert(
            (client, key),
            Endpoint {
                client: acceptor,
                key: remote_key,
            },
        );
        self.endpoints
            .insert((acceptor, remote_key), Endpoint { client, key });

        let initiator_address = self.listen_addresses.get(&client).copied().unwrap_or_else(|| {
            SocketAddr::new(self.ip_of(client).unwrap_or(IpAddr::from([0, 0, 0, 0])), 0)
        });
        queue.push(
            at,
            SimEvent::ConnectionEstablished {
                client: acceptor,
                peer: remote_key,
                remote: initiator_address,
                direction: PeerDirection::Inbound,
            },
        );
        queue.push(
            at,
            SimEvent::ConnectionEstablished {
                client,
                peer: key,
                remote: address,
                direction: PeerDirection::Outbound,
            },
        );
        key
    }

    /// Sends bytes over an open connection. Unknown keys are ignored.
    pub fn send(
        &mut self,
        queue: &mut EventQueue,
        now: Duration,
        client: ClientId,
        key: PeerKey,
        data: Bytes,
    ) {
        let Some(remote) = self.endpoints.get(&(client, key)).copied() else {
            tracing::trace!(node = %client, peer = %key, "Send on closed connection");
            return;
        };
        let free_at = self.uplink_free_at.get(&client).copied().unwrap_or_default();
        let done = now.max(free_at) + self.transmission_time(data.len());
        self.uplink_free_at.insert(client, done);
        self.bytes_sent += data.len() as u64;
        queue.push(
            done + self.latency,
            SimEvent::DataReceived {
                client: remote.client,
                peer: remote.key,
                data,
            },
        );
    }

    /// Closes a connection; only the remote side is notified.
    pub fn close(&mut self, queue: &mut EventQueue, now: Duration, client: ClientId, key: PeerKey) {
        let Some(remote) = self.endpoints.remove(&(client, key)) else {
            return;
        };
        self.endpoints.remove(&(remote.client, remote.key));
        queue.push(
            now + self.latency,
            SimEvent::ConnectionClosed {
                client: remote.client,
                peer: remote.key,
            },
        );
    }

    /// Open connection ends, counting both sides.
    pub fn open_endpoints(&self) -> usize {
        self.endpoints.len()
    }

    /// Bytes handed to uplinks so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn allocate_key(&mut self) -> PeerKey {
        let key = PeerKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn transmission_time(&self, len: usize) -> Duration {
        if self.uplink_bytes_per_sec == 0 {
            return Duration::ZERO;
        }
        let nanos = len as u128 * 1_000_000_000 / u128::from(self.uplink_bytes_per_sec);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}
