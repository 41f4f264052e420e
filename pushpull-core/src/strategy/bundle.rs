//! The closed set of strategies a bundle can hold.

use super::{
    ChokeUnchokeStrategy, PartSelectionStrategy, PeerConnectorStrategy,
    RequestSchedulingStrategy, Strategy, StrategyKind, VideoMetricsStrategy,
};
use crate::client::Client;

/// One member of a client's strategy bundle, tagged by role.
///
/// Cloning shares the strategy's state, so a clone kept in the bundle and
/// the one being initialized are the same strategy.
#[derive(Clone)]
pub enum BundledStrategy {
    PeerConnector(PeerConnectorStrategy),
    ChokeUnchoke(ChokeUnchokeStrategy),
    PartSelection(PartSelectionStrategy),
    RequestScheduling(RequestSchedulingStrategy),
    VideoMetrics(VideoMetricsStrategy),
}

impl BundledStrategy {
    /// Fresh strategy of `kind`. Peer connectors reuse `connector`.
    pub fn for_kind(kind: StrategyKind, connector: &PeerConnectorStrategy) -> Self {
        match kind {
            StrategyKind::PeerConnector => Self::PeerConnector(connector.clone()),
            StrategyKind::ChokeUnchoke => Self::ChokeUnchoke(ChokeUnchokeStrategy::new()),
            StrategyKind::SequentialPartSelection => {
                Self::PartSelection(PartSelectionStrategy::sequential())
            }
            StrategyKind::RarestFirstPartSelection => {
                Self::PartSelection(PartSelectionStrategy::rarest_first())
            }
            StrategyKind::RequestScheduling => {
                Self::RequestScheduling(RequestSchedulingStrategy::new())
            }
            StrategyKind::VideoMetrics => Self::VideoMetrics(VideoMetricsStrategy::new()),
        }
    }

    pub fn as_peer_connector(&self) -> Option<&PeerConnectorStrategy> {
        match self {
            Self::PeerConnector(strategy) => Some(strategy),
            _ => None,
        }
    }

    pub fn as_choke_unchoke(&self) -> Option<&ChokeUnchokeStrategy> {
        match self {
            Self::ChokeUnchoke(strategy) => Some(strategy),
            _ => None,
        }
    }

    pub fn as_part_selection(&self) -> Option<&PartSelectionStrategy> {
        match self {
            Self::PartSelection(strategy) => Some(strategy),
            _ => None,
        }
    }

    pub fn as_request_scheduling(&self) -> Option<&RequestSchedulingStrategy> {
        match self {
            Self::RequestScheduling(strategy) => Some(strategy),
            _ => None,
        }
    }

    pub fn as_video_metrics(&self) -> Option<&VideoMetricsStrategy> {
        match self {
            Self::VideoMetrics(strategy) => Some(strategy),
            _ => None,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Strategy {
        match self {
            Self::PeerConnector(strategy) => strategy,
            Self::ChokeUnchoke(strategy) => strategy,
            Self::PartSelection(strategy) => strategy,
            Self::RequestScheduling(strategy) => strategy,
            Self::VideoMetrics(strategy) => strategy,
        }
    }
}

impl Strategy for BundledStrategy {
    fn kind(&self) -> StrategyKind {
        match self {
            Self::PeerConnector(strategy) => strategy.kind(),
            Self::ChokeUnchoke(strategy) => strategy.kind(),
            Self::PartSelection(strategy) => strategy.kind(),
            Self::RequestScheduling(strategy) => strategy.kind(),
            Self::VideoMetrics(strategy) => strategy.kind(),
        }
    }

    fn initialize(&mut self, client: &mut Client) {
        self.inner_mut().initialize(client);
    }
}
