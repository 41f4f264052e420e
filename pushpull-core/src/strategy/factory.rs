//! Protocol names and the strategy bundles they stand for.

use std::fmt;

use super::{BundledStrategy, PeerConnectorStrategy, StrategyKind};
use crate::client::Client;

/// Protocols a client can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolName {
    Default,
    RarestFirst,
    RarestFirstVod,
    Bitos,
    GiveToGet,
}

impl ProtocolName {
    /// Every known protocol.
    pub const ALL: [ProtocolName; 5] = [
        ProtocolName::Default,
        ProtocolName::RarestFirst,
        ProtocolName::RarestFirstVod,
        ProtocolName::Bitos,
        ProtocolName::GiveToGet,
    ];

    /// Exact-match lookup of a configured name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|protocol| protocol.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolName::Default => "default",
            ProtocolName::RarestFirst => "rarest-first",
            ProtocolName::RarestFirstVod => "rarest-first-vod",
            ProtocolName::Bitos => "bitos",
            ProtocolName::GiveToGet => "give-to-get",
        }
    }

    /// Strategies of the bundle, in initialization order.
    pub fn recipe(self) -> &'static [StrategyKind] {
        use StrategyKind::*;
        match self {
            ProtocolName::Default => &[
                PeerConnector,
                ChokeUnchoke,
                SequentialPartSelection,
                RequestScheduling,
            ],
            ProtocolName::RarestFirst => &[
                PeerConnector,
                ChokeUnchoke,
                RarestFirstPartSelection,
                RequestScheduling,
            ],
            // Video protocols have no part selection yet; they only serve
            // and measure.
            ProtocolName::RarestFirstVod | ProtocolName::Bitos => {
                &[PeerConnector, ChokeUnchoke, RequestScheduling, VideoMetrics]
            }
            ProtocolName::GiveToGet => &[PeerConnector, RequestScheduling, VideoMetrics],
        }
    }
}

impl fmt::Display for ProtocolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds strategy bundles for clients.
pub struct ProtocolFactory;

impl ProtocolFactory {
    /// Instantiates and installs the bundle for `name` on `client`, each
    /// strategy joining the bundle before it initializes. Unknown names get
    /// the `default` bundle.
    ///
    /// Returns the bundle's peer connector, which the client uses for
    /// listening and cloud membership.
    pub fn create_strategy_bundle(name: &str, client: &mut Client) -> PeerConnectorStrategy {
        let protocol = ProtocolName::from_name(name).unwrap_or_else(|| {
            tracing::warn!(node = %client.id(), protocol = name, "Unknown protocol, using default");
            ProtocolName::Default
        });

        let connector = PeerConnectorStrategy::new();
        for kind in protocol.recipe() {
            client.add_strategy(BundledStrategy::for_kind(*kind, &connector));
        }
        tracing::debug!(node = %client.id(), %protocol, "Strategy bundle created");
        connector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_mocks::started_client;
    use crate::config::ClientConfig;
    use crate::events::MetricsMap;
    use crate::strategy::Capability;

    fn kinds_for(protocol: &str) -> Vec<StrategyKind> {
        let config = ClientConfig {
            protocol: protocol.to_string(),
            ..ClientConfig::for_testing()
        };
        started_client(config).unwrap().0.strategy_kinds()
    }

    #[test]
    fn test_rarest_first_bundle_shape() {
        assert_eq!(
            kinds_for("rarest-first"),
            vec![
                StrategyKind::PeerConnector,
                StrategyKind::ChokeUnchoke,
                StrategyKind::RarestFirstPartSelection,
                StrategyKind::RequestScheduling,
            ]
        );
    }

    #[test]
    fn test_unknown_protocol_gets_default_bundle() {
        assert_eq!(kinds_for("no-such-protocol"), kinds_for("default"));
        assert_eq!(kinds_for("default")[2], StrategyKind::SequentialPartSelection);
    }

    #[test]
    fn test_give_to_get_has_no_choke_unchoke() {
        let capabilities: Vec<Capability> = kinds_for("give-to-get")
            .into_iter()
            .map(StrategyKind::capability)
            .collect();
        assert!(!capabilities.contains(&Capability::ChokeUnchoke));
        assert!(capabilities.contains(&Capability::VideoMetrics));
    }

    #[test]
    fn test_protocol_names_roundtrip() {
        for protocol in ProtocolName::ALL {
            assert_eq!(ProtocolName::from_name(protocol.as_str()), Some(protocol));
        }
        assert_eq!(ProtocolName::from_name("Default"), None);
    }

    #[test]
    fn test_gather_keeps_fluency_from_every_subscriber() {
        let config = ClientConfig {
            protocol: "rarest-first-vod".to_string(),
            ..ClientConfig::for_testing()
        };
        let (mut client, log) = started_client(config).unwrap();
        client.events_mut().gather_metrics.subscribe(|_, _: &()| {
            MetricsMap::from([("fluency".to_string(), "1".to_string())])
        });

        let report = client.collect_metrics();

        assert_eq!(report.get_all("fluency"), vec!["div/0", "1"]);
        assert_eq!(log.borrow().reports.len(), 1);
    }
}
