//! Client core: owns peers, bitfield, strategies and services of one node.
//!
//! The client is single-threaded and event driven. The transport, scheduler
//! and tracker owner calls the `handle_*` methods; the client updates its
//! state and fires channels on its [`EventBus`], which the active strategies
//! consume. Handlers receive `&mut Client`, so strategies act on the client
//! without holding a pointer to it.

mod cloud;
mod dispatch;
mod metrics;
mod options;
mod remote;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;
mod transfer;
mod upload;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub use metrics::MetricsReport;
pub(crate) use transfer::Downloads;

use crate::bitfield::PieceBitfield;
use crate::config::{ClientConfig, ConfigError};
use crate::events::{Channel, EventBus, PeerPiece};
use crate::media::MediaData;
use crate::peers::{PeerKey, PeerRegistry};
use crate::protocol::{Handshake, MessageCodec, PeerId, PeerMessage, WireMessage};
use crate::services::{ClientId, ClientServices, ClientTimer, NodeInfo, TimerId, TransportError};
use crate::storage::StorageError;
use crate::strategy::{
    BundledStrategy, PeerConnectorStrategy, ProtocolFactory, Strategy, StrategyKind,
};

/// Errors raised by client lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Client {id} already started")]
    AlreadyStarted { id: ClientId },

    #[error("Invalid client configuration")]
    Config(#[from] ConfigError),

    #[error("Content unavailable")]
    Storage(#[from] StorageError),

    #[error("Transport failure")]
    Transport(#[from] TransportError),
}

/// One push-pull client bound to a simulated node.
pub struct Client {
    node: NodeInfo,
    config: ClientConfig,
    media: Arc<MediaData>,
    peer_id: PeerId,
    bitfield: PieceBitfield,
    bitfield_overrides: BTreeMap<u32, u8>,
    downloads: Downloads,
    peers: PeerRegistry,
    events: EventBus,
    strategies: Vec<BundledStrategy>,
    connector: Option<PeerConnectorStrategy>,
    services: ClientServices,
    rng: ChaCha8Rng,
    strategy_options: BTreeMap<String, String>,
    option_changes: BTreeMap<String, (String, String)>,
    gather_timer: Option<TimerId>,
    seeding_timer: Option<TimerId>,
    cloud_joined: bool,
    cloud_established: bool,
    download_completed: bool,
    started: bool,
}

impl Client {
    /// Creates an idle client. Nothing is scheduled until [`Client::start`].
    ///
    /// # Errors
    ///
    /// - `ClientError::Config` - Configuration fails validation
    pub fn new(
        node: NodeInfo,
        config: ClientConfig,
        media: Arc<MediaData>,
        services: ClientServices,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let seed = config
            .rng_seed
            .unwrap_or_else(|| 0x9e37_79b9 ^ u64::from(node.id.0).rotate_left(32));
        Ok(Self {
            node,
            bitfield: PieceBitfield::empty(&media),
            media,
            config,
            peer_id: PeerId::default(),
            bitfield_overrides: BTreeMap::new(),
            downloads: Downloads::default(),
            peers: PeerRegistry::default(),
            events: EventBus::default(),
            strategies: Vec::new(),
            connector: None,
            services,
            rng: ChaCha8Rng::seed_from_u64(seed),
            strategy_options: BTreeMap::new(),
            option_changes: BTreeMap::new(),
            gather_timer: None,
            seeding_timer: None,
            cloud_joined: false,
            cloud_established: false,
            download_completed: false,
            started: false,
        })
    }

    /// Builds the bitfield and protocol bundle, then starts listening.
    ///
    /// A listen failure tears the bundle down again, so `start` may be
    /// retried.
    ///
    /// # Errors
    ///
    /// - `ClientError::AlreadyStarted` - Called twice
    /// - `ClientError::Config` - Initial bitfield policy cannot be parsed
    /// - `ClientError::Storage` - Content store could not load the media
    /// - `ClientError::Transport` - Listen port unavailable
    pub fn start(&mut self) -> Result<(), ClientError> {
        if self.started {
            return Err(ClientError::AlreadyStarted { id: self.node.id });
        }

        let suffix: u32 = self.rng.random();
        self.peer_id = PeerId::from_text(&format!("VODSim-{}-{}", self.node.id, suffix));

        self.services
            .storage
            .ensure_loaded(self.media.name(), self.media.file_length())?;

        let policy = self.config.fill_policy()?;
        let overrides = self.bitfield_overrides.clone();
        self.bitfield = PieceBitfield::build(
            &self.media,
            &policy,
            overrides,
            self.config.pull_window_bytes,
            &mut self.rng,
        );
        self.download_completed = self.bitfield.download_completed();
        self.started = true;

        let subscriptions = self.events.clone();
        let protocol = self.config.protocol.clone();
        let connector = ProtocolFactory::create_strategy_bundle(&protocol, self);
        if let Err(error) = connector.start_listening(self) {
            self.strategies.clear();
            self.events = subscriptions;
            self.started = false;
            return Err(error.into());
        }
        self.connector = Some(connector);

        if self.config.auto_connect {
            self.schedule(Duration::ZERO, ClientTimer::JoinCloud);
        }
        let period = self.config.gather_metrics_period;
        self.gather_timer = Some(self.schedule(period, ClientTimer::GatherMetrics));

        let text = format!(
            "{} on node {} (address {}) using protocol {} starting with {} pieces completed and auto-connect {}",
            self.peer_id,
            self.node.id,
            self.address(),
            protocol,
            self.bitfield.pieces_completed(),
            if self.config.auto_connect {
                "enabled"
            } else {
                "disabled"
            }
        );
        let now = self.now();
        self.services.metrics.announce(self.node.id, now, &text);
        tracing::info!(node = %self.node.id, "{text}");

        Channel::fire_in(self, |c| &c.events.application_initialized, &());
        Ok(())
    }

    /// Node identity.
    pub fn id(&self) -> ClientId {
        self.node.id
    }

    /// Listen address: node ip and configured port.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.node.ip, self.config.listen_port)
    }

    /// Current configuration, including runtime changes.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Shared content metadata.
    pub fn media(&self) -> &Arc<MediaData> {
        &self.media
    }

    /// Peer id, assigned by [`Client::start`].
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Local piece ownership.
    pub fn bitfield(&self) -> &PieceBitfield {
        &self.bitfield
    }

    /// Connected and connecting peers.
    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    /// Event channels, for subscribing.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Event channels, for inspection.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.services.scheduler.now()
    }

    /// Whether [`Client::start`] ran.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether the whole completion window has been downloaded.
    pub fn is_download_completed(&self) -> bool {
        self.download_completed
    }

    /// Whether the client is currently joined to the cloud.
    pub fn is_cloud_joined(&self) -> bool {
        self.cloud_joined
    }

    /// Kinds of the active strategies in bundle order.
    pub fn strategy_kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|strategy| strategy.kind()).collect()
    }

    /// First active strategy of `kind`.
    pub fn strategy(&self, kind: StrategyKind) -> Option<&BundledStrategy> {
        self.strategies
            .iter()
            .find(|strategy| strategy.kind() == kind)
    }

    /// Appends `strategy` to the bundle, then initializes it.
    pub fn add_strategy(&mut self, mut strategy: BundledStrategy) {
        tracing::debug!(node = %self.node.id, kind = ?strategy.kind(), "Strategy added");
        self.strategies.push(strategy.clone());
        strategy.initialize(self);
    }

    /// Drops all strategies, as on teardown.
    pub fn clear_strategies(&mut self) {
        self.strategies.clear();
        self.connector = None;
    }

    /// Fires piece-requested for an accepted upload.
    pub fn notify_piece_requested(&mut self, event: PeerPiece) {
        Channel::fire_in(self, |c| &c.events.piece_requested, &event);
    }

    pub(crate) fn schedule(&mut self, delay: Duration, timer: ClientTimer) -> TimerId {
        self.services.scheduler.schedule(delay, timer)
    }

    pub(crate) fn cancel_timer(&mut self, timer: TimerId) {
        self.services.scheduler.cancel(timer);
    }

    pub(crate) fn services_mut(&mut self) -> &mut ClientServices {
        &mut self.services
    }

    pub(crate) fn connector(&self) -> Option<PeerConnectorStrategy> {
        self.connector.clone()
    }

    /// Encodes and sends a framed message.
    pub fn send_message(&mut self, peer: PeerKey, message: &PeerMessage) {
        tracing::trace!(node = %self.node.id, %peer, ?message, "Sending message");
        self.services
            .transport
            .send(peer, MessageCodec::encode(message));
    }

    fn send_handshake(&mut self, peer: PeerKey) {
        let handshake = Handshake::new(self.media.info_hash(), self.peer_id);
        let mut buf = BytesMut::with_capacity(handshake.serialized_len());
        handshake.serialize(&mut buf);
        self.services.transport.send(peer, buf.freeze());
    }

    fn send_bitfield(&mut self, peer: PeerKey) {
        let bitfield: Bytes = self.bitfield.to_bytes();
        self.send_message(peer, &PeerMessage::Bitfield { bitfield });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_mocks::{started_client, test_client};
    use crate::protocol::PieceIndex;

    #[test]
    fn test_start_listens_announces_and_arms_timers() {
        let (mut client, log) = test_client(ClientConfig::for_testing()).unwrap();
        assert!(!client.is_started());

        client.start().unwrap();

        assert!(client.is_started());
        assert!(client.peer_id().to_string().starts_with("VODSim-1-"));
        let log = log.borrow();
        assert_eq!(log.listening, vec![client.config().listen_port]);
        assert_eq!(log.announcements.len(), 1);
        assert!(log.announcements[0].contains("using protocol rarest-first"));
        assert_eq!(
            log.pending_timers(|timer| matches!(timer, ClientTimer::JoinCloud)).len(),
            1
        );
        assert_eq!(
            log.pending_timers(|timer| matches!(timer, ClientTimer::GatherMetrics)).len(),
            1
        );
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (mut client, _log) = started_client(ClientConfig::for_testing()).unwrap();
        assert!(matches!(client.start(), Err(ClientError::AlreadyStarted { .. })));
    }

    #[test]
    fn test_new_rejects_bad_fill_policy() {
        let config = ClientConfig {
            initial_bitfield: "random:lots".to_string(),
            ..ClientConfig::for_testing()
        };
        assert!(matches!(test_client(config), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_full_seeder_starts_completed() {
        let config = ClientConfig {
            initial_bitfield: "full".to_string(),
            ..ClientConfig::for_testing()
        };
        let (client, _log) = started_client(config).unwrap();

        assert!(client.is_download_completed());
        assert!(client.bitfield().has_piece(PieceIndex::new(9)));
        assert!(client.cloud_announce().seeder);
    }

    #[test]
    fn test_added_strategy_joins_bundle_and_subscribes() {
        let (mut client, _log) = started_client(ClientConfig::for_testing()).unwrap();
        let gatherers = client.events().gather_metrics.len();
        let connector = client.connector().unwrap();

        client.add_strategy(BundledStrategy::for_kind(StrategyKind::VideoMetrics, &connector));

        assert_eq!(client.strategy_kinds().last(), Some(&StrategyKind::VideoMetrics));
        assert_eq!(client.events().gather_metrics.len(), gatherers + 1);
        let metrics = client
            .strategy(StrategyKind::VideoMetrics)
            .and_then(|strategy| strategy.as_video_metrics())
            .unwrap();
        assert_eq!(metrics.fluency(), "div/0");
    }

    #[test]
    fn test_clear_strategies_drops_bundle() {
        let (mut client, _log) = started_client(ClientConfig::for_testing()).unwrap();
        assert!(!client.strategy_kinds().is_empty());

        client.clear_strategies();

        assert!(client.strategy_kinds().is_empty());
        assert!(client.connector().is_none());
    }
}
