//! Pluggable protocol strategies and the bundles that compose them.
//!
//! A strategy is built without side effects and wired up in
//! [`Strategy::initialize`], where it subscribes to client events. Mutable
//! strategy state lives behind `Rc<RefCell<_>>` shared with the subscribed
//! closures. Handlers must release that borrow before calling client methods
//! that fire further events, since those may re-enter the same strategy.

mod bundle;
mod choke;
mod factory;
mod part_selection;
mod peer_connector;
mod piece_picker;
mod request_scheduling;
mod video_metrics;

pub use bundle::BundledStrategy;
pub use choke::ChokeUnchokeStrategy;
pub use factory::{ProtocolFactory, ProtocolName};
pub use part_selection::PartSelectionStrategy;
pub use peer_connector::PeerConnectorStrategy;
pub use piece_picker::{PiecePicker, RarestFirstPicker, SequentialPicker};
pub use request_scheduling::{RequestSchedulingStrategy, RequestStats};
pub use video_metrics::VideoMetricsStrategy;

use crate::client::Client;

/// Roles a strategy can fill in a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    PeerConnector,
    ChokeUnchoke,
    PartSelection,
    RequestScheduling,
    VideoMetrics,
}

/// Concrete strategy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    PeerConnector,
    ChokeUnchoke,
    SequentialPartSelection,
    RarestFirstPartSelection,
    RequestScheduling,
    VideoMetrics,
}

impl StrategyKind {
    /// The role this variant fills.
    pub fn capability(self) -> Capability {
        match self {
            StrategyKind::PeerConnector => Capability::PeerConnector,
            StrategyKind::ChokeUnchoke => Capability::ChokeUnchoke,
            StrategyKind::SequentialPartSelection | StrategyKind::RarestFirstPartSelection => {
                Capability::PartSelection
            }
            StrategyKind::RequestScheduling => Capability::RequestScheduling,
            StrategyKind::VideoMetrics => Capability::VideoMetrics,
        }
    }
}

/// One unit of protocol behavior bound to a single client.
pub trait Strategy {
    /// Concrete variant.
    fn kind(&self) -> StrategyKind;

    /// Subscribes to the client's events. Called once, right after the
    /// strategy joins the client's bundle.
    fn initialize(&mut self, client: &mut Client);
}
