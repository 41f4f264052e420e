//! Connected peers and their protocol state

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;

use bytes::BytesMut;

use crate::bitfield::Bitfield;
use crate::protocol::{BlockRequest, PeerId, PieceIndex};

/// Connection identity assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey(pub u64);

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerDirection {
    Inbound,
    Outbound,
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Outbound connect in progress
    Connecting,
    /// Transport connected, waiting for the remote handshake
    Handshaking,
    /// Handshake exchanged, framed messages flow
    Active,
    /// Being torn down; close listeners still see it
    Closing,
}

/// One active or attempted connection.
#[derive(Debug)]
pub struct Peer {
    key: PeerKey,
    address: SocketAddr,
    direction: PeerDirection,
    pub(crate) state: PeerState,
    pub(crate) remote_id: Option<PeerId>,
    pub(crate) bitfield: Bitfield,
    pub(crate) bitfield_seen: bool,
    pub(crate) am_choking: bool,
    pub(crate) am_interested: bool,
    pub(crate) peer_choking: bool,
    pub(crate) peer_interested: bool,
    pub(crate) outstanding: BTreeSet<BlockRequest>,
    pub(crate) receive_buffer: BytesMut,
    pub(crate) listen_port: Option<u16>,
    pub(crate) downloaded_bytes: u64,
    pub(crate) uploaded_bytes: u64,
}

impl Peer {
    /// Creates a choked, uninterested peer with an empty bitfield.
    pub fn new(key: PeerKey, address: SocketAddr, direction: PeerDirection, piece_count: u32) -> Self {
        let state = match direction {
            PeerDirection::Outbound => PeerState::Connecting,
            PeerDirection::Inbound => PeerState::Handshaking,
        };
        Self {
            key,
            address,
            direction,
            state,
            remote_id: None,
            bitfield: Bitfield::new(piece_count),
            bitfield_seen: false,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            outstanding: BTreeSet::new(),
            receive_buffer: BytesMut::new(),
            listen_port: None,
            downloaded_bytes: 0,
            uploaded_bytes: 0,
        }
    }

    /// Connection identity.
    pub fn key(&self) -> PeerKey {
        self.key
    }

    /// Remote socket address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Who opened the connection.
    pub fn direction(&self) -> PeerDirection {
        self.direction
    }

    /// Lifecycle state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Whether framed messages may be exchanged.
    pub fn is_active(&self) -> bool {
        self.state == PeerState::Active
    }

    /// Remote peer id, known after its handshake.
    pub fn remote_id(&self) -> Option<PeerId> {
        self.remote_id
    }

    /// Pieces the peer advertised.
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    /// Whether the peer advertised `piece`.
    pub fn has_piece(&self, piece: PieceIndex) -> bool {
        self.bitfield.has_piece(piece)
    }

    /// We refuse to serve this peer.
    pub fn am_choking(&self) -> bool {
        self.am_choking
    }

    /// We want pieces from this peer.
    pub fn am_interested(&self) -> bool {
        self.am_interested
    }

    /// The peer refuses to serve us.
    pub fn peer_choking(&self) -> bool {
        self.peer_choking
    }

    /// The peer wants pieces from us.
    pub fn peer_interested(&self) -> bool {
        self.peer_interested
    }

    /// Blocks we requested and have not received.
    pub fn outstanding(&self) -> &BTreeSet<BlockRequest> {
        &self.outstanding
    }

    /// Outstanding requests for one piece.
    pub fn outstanding_for(&self, piece: PieceIndex) -> usize {
        self.outstanding
            .iter()
            .filter(|block| block.piece == piece)
            .count()
    }

    /// Listen port from the peer's port message.
    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    /// Payload bytes received from this peer.
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    /// Payload bytes sent to this peer.
    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }
}

/// Insertion-ordered set of peers owned by one client.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
}

impl PeerRegistry {
    /// Appends a peer.
    pub fn insert(&mut self, peer: Peer) {
        self.peers.push(peer);
    }

    /// Removes the first peer with `key`; unknown keys are ignored.
    pub fn remove(&mut self, key: PeerKey) -> Option<Peer> {
        let position = self.peers.iter().position(|peer| peer.key == key)?;
        Some(self.peers.remove(position))
    }

    /// Peer by key.
    pub fn get(&self, key: PeerKey) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.key == key)
    }

    /// Mutable peer by key.
    pub fn get_mut(&mut self, key: PeerKey) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|peer| peer.key == key)
    }

    /// Whether a connection to or from `address` exists.
    pub fn contains_address(&self, address: SocketAddr) -> bool {
        self.peers.iter().any(|peer| peer.address == address)
    }

    /// Keys in insertion order; safe to hold while the registry changes.
    pub fn keys(&self) -> Vec<PeerKey> {
        self.peers.iter().map(|peer| peer.key).collect()
    }

    /// Peers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    /// Peers that completed the handshake.
    pub fn active(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter().filter(|peer| peer.is_active())
    }

    /// Peers that are neither closing nor closed.
    pub fn live_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|peer| peer.state != PeerState::Closing)
            .count()
    }

    /// Number of peers, including ones still connecting.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
