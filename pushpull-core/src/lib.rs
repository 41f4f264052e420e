//! PushPull Core - Swarm protocol engine for discrete-event simulation
//!
//! This crate provides the building blocks of a BitTorrent-style push-pull
//! client: the peer wire codec, piece bitfields, media metadata, pluggable
//! protocol strategies and the single-threaded client that drives them.
//! Network, clock, tracker, content and metrics are injected through the
//! traits in [`services`], so the same client runs under a simulator or in
//! unit tests.

pub mod bitfield;
pub mod client;
pub mod config;
pub mod events;
pub mod media;
pub mod peers;
pub mod protocol;
pub mod services;
pub mod storage;
pub mod strategy;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use bitfield::{Bitfield, FillPolicy, PieceBitfield};
pub use client::{Client, ClientError, MetricsReport};
pub use config::{ClientConfig, ConfigError};
pub use events::{EventBus, MetricsMap, PlaybackEvent, PlaybackState};
pub use media::{MediaData, MediaError};
pub use peers::{PeerDirection, PeerKey, PeerState};
pub use protocol::{BlockRequest, InfoHash, PeerId, PeerMessage, PieceIndex, WireError};
pub use services::{
    ClientId, ClientServices, ClientTimer, CloudAnnounce, NodeInfo, TrackerResponse,
    TransportError,
};
pub use storage::{ContentStore, FakeDataStore, StorageError, SyntheticContent};
pub use strategy::{BundledStrategy, ProtocolFactory, ProtocolName, Strategy, StrategyKind};

/// Errors that can bubble up from any PushPull subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PushPullError {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl PushPullError {
    /// Checks if this error stems from bad configuration or metadata input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PushPullError::Config(_)
                | PushPullError::Media(MediaError::InvalidMetadata { .. })
                | PushPullError::Client(ClientError::Config(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, PushPullError>;
