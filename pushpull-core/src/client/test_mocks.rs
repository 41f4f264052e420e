//! Recording service mocks for driving a single client in tests.
//!
//! All mocks share one [`MockLog`]. Nothing is delivered automatically: a
//! test inspects what the client sent or scheduled and feeds responses back
//! through the client's `handle_*` methods.

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use super::{Client, ClientError, MetricsReport};
use crate::bitfield::Bitfield;
use crate::config::ClientConfig;
use crate::media::MediaData;
use crate::peers::{PeerDirection, PeerKey};
use crate::protocol::{Handshake, MessageCodec, PeerId, PeerMessage, WireMessage};
use crate::services::{
    ClientId, ClientServices, ClientTimer, CloudAnnounce, CloudService, MetricsSink, NodeInfo,
    Scheduler, TimerId, Transport, TransportError,
};
use crate::storage::{FakeDataStore, SyntheticContent};

/// Seed of the content served by [`test_media`] clients.
pub const TEST_CONTENT_SEED: u64 = 7;

/// Everything the mocks observed.
#[derive(Debug, Default)]
pub struct MockLog {
    pub now: Duration,
    pub listening: Vec<u16>,
    pub connects: Vec<(PeerKey, SocketAddr)>,
    pub sent: Vec<(PeerKey, Bytes)>,
    pub closed: Vec<PeerKey>,
    pub timers: Vec<(TimerId, Duration, ClientTimer)>,
    pub cancelled: Vec<TimerId>,
    pub joins: Vec<CloudAnnounce>,
    pub leaves: Vec<CloudAnnounce>,
    pub seeders: Vec<CloudAnnounce>,
    pub announcements: Vec<String>,
    pub reports: Vec<MetricsReport>,
    next_key: u64,
    next_timer: u64,
}

impl MockLog {
    /// Framed messages sent to `peer`, handshakes skipped.
    pub fn messages_to(&self, peer: PeerKey, bitfield_size: usize) -> Vec<PeerMessage> {
        self.sent
            .iter()
            .filter(|(key, _)| *key == peer)
            .filter(|(_, data)| !is_handshake(data))
            .filter_map(|(_, data)| MessageCodec::decode_frame(data, bitfield_size).ok())
            .map(|(message, _)| message)
            .collect()
    }

    /// Handshakes sent to `peer`.
    pub fn handshakes_to(&self, peer: PeerKey) -> usize {
        self.sent
            .iter()
            .filter(|(key, data)| *key == peer && is_handshake(data))
            .count()
    }

    /// Drops recorded sends.
    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Removes and returns pending timers matching `filter`, oldest first.
    pub fn take_timers(&mut self, filter: impl Fn(&ClientTimer) -> bool) -> Vec<ClientTimer> {
        let (taken, kept): (Vec<_>, Vec<_>) = self
            .timers
            .drain(..)
            .partition(|(_, _, timer)| filter(timer));
        self.timers = kept;
        taken.into_iter().map(|(_, _, timer)| timer).collect()
    }

    /// Pending timers matching `filter`.
    pub fn pending_timers(&self, filter: impl Fn(&ClientTimer) -> bool) -> Vec<ClientTimer> {
        self.timers
            .iter()
            .filter(|(_, _, timer)| filter(timer))
            .map(|(_, _, timer)| *timer)
            .collect()
    }
}

fn is_handshake(data: &[u8]) -> bool {
    Handshake::complete_len(data) == Some(data.len()) && data.first() != Some(&0)
}

/// Shared log handle.
pub type SharedLog = Rc<RefCell<MockLog>>;

/// Transport that records calls and hands out sequential keys.
#[derive(Debug)]
pub struct RecordingTransport {
    log: SharedLog,
    port_in_use: Option<u16>,
}

impl RecordingTransport {
    pub fn new(log: SharedLog) -> Self {
        Self {
            log,
            port_in_use: None,
        }
    }

    /// Makes `listen` fail for `port`.
    pub fn with_port_in_use(mut self, port: u16) -> Self {
        self.port_in_use = Some(port);
        self
    }
}

impl Transport for RecordingTransport {
    fn listen(&mut self, port: u16) -> Result<(), TransportError> {
        if self.port_in_use == Some(port) {
            return Err(TransportError::PortInUse { port });
        }
        self.log.borrow_mut().listening.push(port);
        Ok(())
    }

    fn connect(&mut self, address: SocketAddr) -> PeerKey {
        let mut log = self.log.borrow_mut();
        log.next_key += 1;
        // Outbound keys live above the range tests use for inbound peers.
        let key = PeerKey(1_000 + log.next_key);
        log.connects.push((key, address));
        key
    }

    fn send(&mut self, peer: PeerKey, data: Bytes) {
        self.log.borrow_mut().sent.push((peer, data));
    }

    fn close(&mut self, peer: PeerKey) {
        self.log.borrow_mut().closed.push(peer);
    }
}

/// Scheduler whose clock only moves when a test sets `MockLog::now`.
#[derive(Debug)]
pub struct ManualScheduler {
    log: SharedLog,
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Duration {
        self.log.borrow().now
    }

    fn schedule(&mut self, delay: Duration, timer: ClientTimer) -> TimerId {
        let mut log = self.log.borrow_mut();
        log.next_timer += 1;
        let id = TimerId(log.next_timer);
        let at = log.now + delay;
        log.timers.push((id, at, timer));
        id
    }

    fn cancel(&mut self, timer: TimerId) {
        let mut log = self.log.borrow_mut();
        log.timers.retain(|(id, _, _)| *id != timer);
        log.cancelled.push(timer);
    }
}

/// Tracker that only records announcements.
#[derive(Debug)]
pub struct RecordingCloud {
    log: SharedLog,
}

impl CloudService for RecordingCloud {
    fn join(&mut self, announce: &CloudAnnounce) {
        self.log.borrow_mut().joins.push(announce.clone());
    }

    fn leave(&mut self, announce: &CloudAnnounce) {
        self.log.borrow_mut().leaves.push(announce.clone());
    }

    fn announce_seeder(&mut self, announce: &CloudAnnounce) {
        self.log.borrow_mut().seeders.push(announce.clone());
    }
}

/// Metrics sink that keeps everything.
#[derive(Debug)]
pub struct RecordingMetrics {
    log: SharedLog,
}

impl MetricsSink for RecordingMetrics {
    fn announce(&mut self, _node: ClientId, _at: Duration, text: &str) {
        self.log.borrow_mut().announcements.push(text.to_string());
    }

    fn record(&mut self, _node: ClientId, _at: Duration, report: &MetricsReport) {
        self.log.borrow_mut().reports.push(report.clone());
    }
}

/// Services wired to one shared log, serving [`TEST_CONTENT_SEED`] content.
pub fn mock_services(log: &SharedLog) -> ClientServices {
    ClientServices {
        transport: Box::new(RecordingTransport::new(Rc::clone(log))),
        scheduler: Box::new(ManualScheduler {
            log: Rc::clone(log),
        }),
        cloud: Box::new(RecordingCloud {
            log: Rc::clone(log),
        }),
        storage: Box::new(FakeDataStore::new(SyntheticContent::new(TEST_CONTENT_SEED))),
        metrics: Box::new(RecordingMetrics {
            log: Rc::clone(log),
        }),
    }
}

/// Ten pieces of 1000 bytes, the last one 500 bytes.
///
/// # Panics
///
/// Panics if the synthetic torrent cannot be built, which is a bug in the
/// metadata encoder.
pub fn test_media() -> Arc<MediaData> {
    let content = SyntheticContent::new(TEST_CONTENT_SEED);
    match MediaData::synthesize("clip", 9_500, 1_000, &content) {
        Ok(media) => Arc::new(media),
        Err(error) => panic!("CRITICAL: synthetic media must build: {error}"),
    }
}

/// Unstarted client with id 1 at 10.0.0.1.
///
/// # Errors
///
/// - `ClientError::Config` - `config` fails validation
pub fn test_client(config: ClientConfig) -> Result<(Client, SharedLog), ClientError> {
    let log = SharedLog::default();
    let node = NodeInfo {
        id: ClientId(1),
        ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
    };
    let client = Client::new(node, config, test_media(), mock_services(&log))?;
    Ok((client, log))
}

/// Started client with auto-connect disabled.
///
/// # Errors
///
/// - `ClientError` - Configuration or startup failed
pub fn started_client(config: ClientConfig) -> Result<(Client, SharedLog), ClientError> {
    let config = ClientConfig {
        auto_connect: false,
        ..config
    };
    let (mut client, log) = test_client(config)?;
    client.start()?;
    Ok((client, log))
}

/// Handshake bytes from a remote peer for `client`'s content.
pub fn remote_handshake(client: &Client, remote: PeerId) -> Bytes {
    let handshake = Handshake::new(client.media().info_hash(), remote);
    let mut buf = BytesMut::with_capacity(handshake.serialized_len());
    handshake.serialize(&mut buf);
    buf.freeze()
}

/// Connects an inbound peer, completes its handshake and delivers `bitfield`.
pub fn connect_remote(client: &mut Client, key: PeerKey, bitfield: &Bitfield) {
    let address = SocketAddr::from(([10, 0, 1, key.0 as u8], 6881));
    client.handle_connection_established(key, address, PeerDirection::Inbound);
    let handshake = remote_handshake(client, PeerId::from_text(&format!("remote-{}", key.0)));
    client.handle_data_received(key, &handshake);
    deliver(
        client,
        key,
        &PeerMessage::Bitfield {
            bitfield: bitfield.to_bytes(),
        },
    );
}

/// Encodes and delivers one message from `key`.
pub fn deliver(client: &mut Client, key: PeerKey, message: &PeerMessage) {
    client.handle_data_received(key, &MessageCodec::encode(message));
}

/// Bitfield over the test media holding `pieces`.
pub fn remote_bitfield(pieces: &[u32]) -> Bitfield {
    let mut bitfield = Bitfield::new(test_media().piece_count());
    for piece in pieces {
        bitfield.set_piece(crate::protocol::PieceIndex::new(*piece));
    }
    bitfield
}
