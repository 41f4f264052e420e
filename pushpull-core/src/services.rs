//! Injected collaborators of a client.
//!
//! A client never reaches for global state. Everything outside its own
//! protocol logic (sockets, clock, tracker, content, metrics) comes in
//! through these traits, and results come back through the client's
//! `handle_*` methods. The simulator crate provides deterministic
//! implementations; `test-utils` provides recording mocks.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;

use crate::client::MetricsReport;
use crate::peers::PeerKey;
use crate::protocol::{InfoHash, PeerId, PieceIndex};
use crate::storage::ContentStore;

/// Identity of a simulated node and its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a client lives in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: ClientId,
    pub ip: IpAddr,
}

/// Handle of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Handle of a queued block upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadId(pub u64);

/// Timers a client schedules on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTimer {
    /// Join the cloud right after startup
    JoinCloud,
    /// Periodic metrics gather, re-armed after each run
    GatherMetrics,
    /// A peer took too long to deliver a piece
    PieceTimeout { peer: PeerKey, piece: PieceIndex },
    /// Send a queued block
    UploadBlock { upload: UploadId },
    /// Stop seeding and leave the cloud
    SeedingExpired,
}

/// What a client tells the tracker about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudAnnounce {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub address: SocketAddr,
    pub bytes_completed: u64,
    pub seeder: bool,
}

/// Peer list handed out by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerResponse {
    pub peers: Vec<SocketAddr>,
}

/// Transport failures visible to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Port {port} already in use")]
    PortInUse { port: u16 },
}

/// Connection-oriented byte transport.
///
/// Establishment, failure, close and data arrival are reported back through
/// the client's `handle_connection_*` and `handle_data_received` methods.
pub trait Transport {
    /// Accepts inbound connections on `port`.
    ///
    /// # Errors
    ///
    /// - `TransportError::PortInUse` - Another listener owns the port
    fn listen(&mut self, port: u16) -> Result<(), TransportError>;

    /// Starts an outbound connection and returns its key immediately.
    fn connect(&mut self, address: SocketAddr) -> PeerKey;

    /// Queues bytes on a connection. Unknown keys are ignored.
    fn send(&mut self, peer: PeerKey, data: Bytes);

    /// Closes a connection; the remote side is notified, the caller is not.
    fn close(&mut self, peer: PeerKey);
}

/// Discrete-event clock. Fired timers come back through `handle_timer`.
pub trait Scheduler {
    /// Current simulation time.
    fn now(&self) -> Duration;

    /// Fires `timer` after `delay`.
    fn schedule(&mut self, delay: Duration, timer: ClientTimer) -> TimerId;

    /// Cancels a pending timer. Already fired or unknown ids are ignored.
    fn cancel(&mut self, timer: TimerId);
}

/// Tracker access. Peer lists come back through `handle_tracker_response`.
pub trait CloudService {
    /// Registers the client and requests peers.
    fn join(&mut self, announce: &CloudAnnounce);

    /// Unregisters the client.
    fn leave(&mut self, announce: &CloudAnnounce);

    /// Reports that the client now holds all content.
    fn announce_seeder(&mut self, announce: &CloudAnnounce);
}

/// Destination for announcements and gathered metrics.
pub trait MetricsSink {
    /// Free-form line about a node.
    fn announce(&mut self, node: ClientId, at: Duration, text: &str);

    /// One merged metrics gather.
    fn record(&mut self, node: ClientId, at: Duration, report: &MetricsReport);
}

/// Everything a client needs from the outside.
pub struct ClientServices {
    pub transport: Box<dyn Transport>,
    pub scheduler: Box<dyn Scheduler>,
    pub cloud: Box<dyn CloudService>,
    pub storage: Box<dyn ContentStore>,
    pub metrics: Box<dyn MetricsSink>,
}

impl fmt::Debug for ClientServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientServices").finish_non_exhaustive()
    }
}
