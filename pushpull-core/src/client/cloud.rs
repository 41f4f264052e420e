//! Cloud membership and connection management, delegated to the peer connector.

use std::net::SocketAddr;

use crate::events::Channel;
use crate::peers::{Peer, PeerDirection, PeerKey};
use crate::services::CloudAnnounce;

use super::Client;

impl Client {
    /// Joins the tracker cloud through the peer connector.
    pub fn join_cloud(&mut self) {
        if let Some(connector) = self.connector() {
            connector.connect_to_cloud(self);
        }
    }

    /// Leaves the cloud and closes every connection.
    pub fn leave_cloud(&mut self) {
        if let Some(connector) = self.connector() {
            connector.disconnect_from_cloud(self);
        }
    }

    /// Tells the tracker this client is a seeder.
    pub fn announce_as_seeder(&mut self) {
        if let Some(connector) = self.connector() {
            connector.announce_as_seeder(self);
        }
    }

    /// Connects to up to `count` known candidates. Returns how many were started.
    pub fn connect_to_peers(&mut self, count: usize) -> usize {
        self.connector()
            .map_or(0, |connector| connector.connect_to_peers(self, count))
    }

    /// Connects to one address unless it is ourselves or already connected.
    pub fn connect_to_peer(&mut self, address: SocketAddr) -> Option<PeerKey> {
        self.connector()
            .and_then(|connector| connector.connect_to_peer(self, address))
    }

    /// Closes up to `count` connections, oldest first. Returns how many were closed.
    pub fn disconnect_peers(&mut self, count: usize) -> usize {
        let keys: Vec<PeerKey> = self.peers.keys().into_iter().take(count).collect();
        for key in &keys {
            self.close_peer(*key);
        }
        keys.len()
    }

    /// Connections that are not being torn down.
    pub fn peer_count(&self) -> usize {
        self.peers.live_count()
    }

    /// Announcement describing this client to the tracker.
    pub fn cloud_announce(&self) -> CloudAnnounce {
        CloudAnnounce {
            info_hash: self.media.info_hash(),
            peer_id: self.peer_id,
            address: self.address(),
            bytes_completed: self.bitfield.bytes_completed(),
            seeder: self.download_completed,
        }
    }

    pub(crate) fn set_cloud_joined(&mut self, joined: bool) {
        self.cloud_joined = joined;
        if !joined && self.cloud_established {
            self.cloud_established = false;
            Channel::fire_in(self, |c| &c.events.cloud_connection_suspended, &());
        }
    }

    /// Registers and starts an outbound connection.
    pub(crate) fn open_connection(&mut self, address: SocketAddr) -> PeerKey {
        let key = self.services.transport.connect(address);
        let piece_count = self.media.piece_count();
        self.peers
            .insert(Peer::new(key, address, PeerDirection::Outbound, piece_count));
        tracing::debug!(node = %self.node.id, peer = %key, %address, "Connecting");
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_mocks::{connect_remote, remote_bitfield, started_client};
    use crate::config::ClientConfig;

    #[test]
    fn test_connect_to_peer_skips_self_and_duplicates() {
        let (mut client, log) = started_client(ClientConfig::for_testing()).unwrap();
        let other = SocketAddr::from(([10, 0, 0, 2], 6881));

        assert!(client.connect_to_peer(client.address()).is_none());
        assert!(client.connect_to_peer(other).is_some());
        assert!(client.connect_to_peer(other).is_none());
        assert_eq!(log.borrow().connects.len(), 1);
    }

    #[test]
    fn test_disconnect_peers_closes_oldest_first() {
        let (mut client, log) = started_client(ClientConfig::for_testing()).unwrap();
        for key in 1..=3 {
            connect_remote(&mut client, PeerKey(key), &remote_bitfield(&[]));
        }

        assert_eq!(client.disconnect_peers(2), 2);

        assert_eq!(log.borrow().closed, vec![PeerKey(1), PeerKey(2)]);
        assert_eq!(client.peer_count(), 1);
        assert_eq!(client.disconnect_peers(5), 1);
    }

    #[test]
    fn test_seeder_announcement_carries_progress() {
        let config = ClientConfig {
            initial_bitfield: "full".to_string(),
            ..ClientConfig::for_testing()
        };
        let (mut client, log) = started_client(config).unwrap();

        client.announce_as_seeder();

        let log = log.borrow();
        assert_eq!(log.seeders.len(), 1);
        assert!(log.seeders[0].seeder);
        assert_eq!(log.seeders[0].bytes_completed, client.media().file_length());
        assert_eq!(log.seeders[0].info_hash, client.media().info_hash());
    }
}
