//! Argument types carried by event channels

use std::time::Duration;

use bytes::Bytes;

use crate::peers::PeerKey;
use crate::protocol::{BlockRequest, PieceIndex};

/// A peer and one of its pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPiece {
    pub peer: PeerKey,
    pub piece: PieceIndex,
}

/// A peer and a block exchanged with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerBlock {
    pub peer: PeerKey,
    pub block: BlockRequest,
}

/// The remote side changed whether it chokes us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokeChange {
    pub peer: PeerKey,
    pub choked: bool,
}

/// The remote side changed whether it is interested in our pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterestChange {
    pub peer: PeerKey,
    pub interested: bool,
}

/// A peer announced its listen port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortReceived {
    pub peer: PeerKey,
    pub port: u16,
}

/// Extension payload; the sub-message id selects the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionReceived {
    pub peer: PeerKey,
    pub payload: Bytes,
}

/// A runtime option changed from `old` to `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionChange {
    pub name: String,
    pub old: String,
    pub new: String,
}

/// Playback state reported by a video client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    /// Playback has started and not been stopped
    pub playing: bool,
    /// Playback is stalled, typically buffering
    pub paused: bool,
    /// Current playback position
    pub position: Duration,
}

/// Input from a video player driving the playback channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The periodic position update is about to happen
    PositionWillChange,
    /// Position moved, by a periodic update or a seek
    PositionChanged(Duration),
    /// Playing or paused state changed
    StateChanged(PlaybackState),
}
