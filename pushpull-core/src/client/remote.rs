//! Remote choke, interest and piece ownership as announced by peer messages.

use crate::bitfield::Bitfield;
use crate::events::{Channel, ChokeChange, InterestChange, PeerPiece};
use crate::peers::PeerKey;
use crate::protocol::{PieceIndex, WireError};

use super::Client;

impl Client {
    pub(super) fn remote_choke(&mut self, peer: PeerKey, choked: bool) {
        let Some(existing) = self.peers.get_mut(peer) else {
            return;
        };
        if existing.peer_choking == choked {
            return;
        }
        existing.peer_choking = choked;
        if choked {
            self.release_requests(peer, None);
        }
        let change = ChokeChange { peer, choked };
        Channel::fire_in(self, |c| &c.events.choke_state_changing, &change);
    }

    pub(super) fn remote_interest(&mut self, peer: PeerKey, interested: bool) {
        let Some(existing) = self.peers.get_mut(peer) else {
            return;
        };
        if existing.peer_interested == interested {
            return;
        }
        existing.peer_interested = interested;
        let change = InterestChange { peer, interested };
        Channel::fire_in(self, |c| &c.events.interest_state_changing, &change);
    }

    pub(super) fn remote_have(&mut self, peer: PeerKey, piece: PieceIndex) {
        let piece_count = self.media.piece_count();
        if piece.as_u32() >= piece_count {
            let error = WireError::LengthMismatch {
                message: "have",
                declared: piece.as_usize(),
                expected: piece_count as usize,
            };
            self.reject(peer, &error);
            return;
        }
        let newly_set = self
            .peers
            .get_mut(peer)
            .is_some_and(|existing| existing.bitfield.set_piece(piece));
        if newly_set {
            let event = PeerPiece { peer, piece };
            Channel::fire_in(self, |c| &c.events.piece_have_received, &event);
        }
    }

    pub(super) fn remote_bitfield(&mut self, peer: PeerKey, bits: &[u8]) {
        let mut received = match Bitfield::from_bytes(bits, self.media.piece_count()) {
            Ok(received) => received,
            Err(error) => {
                self.reject(peer, &error);
                return;
            }
        };
        let Some(existing) = self.peers.get_mut(peer) else {
            return;
        };
        if existing.bitfield_seen {
            tracing::warn!(node = %self.node.id, %peer, "Ignoring repeated bitfield");
            return;
        }
        // Pieces announced by Have before the bitfield stay set.
        for piece in existing.bitfield.pieces() {
            received.set_piece(piece);
        }
        existing.bitfield = received;
        existing.bitfield_seen = true;
        Channel::fire_in(self, |c| &c.events.bitfield_received, &peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_mocks::{
        SharedLog, connect_remote, deliver, remote_bitfield, started_client,
    };
    use crate::config::ClientConfig;
    use crate::protocol::PeerMessage;

    fn leecher() -> (Client, SharedLog) {
        started_client(ClientConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_have_out_of_range_closes_connection() {
        let (mut client, log) = leecher();
        let key = PeerKey(1);
        connect_remote(&mut client, key, &remote_bitfield(&[0]));

        deliver(&mut client, key, &PeerMessage::Have { piece: PieceIndex::new(50) });

        assert!(client.peers().get(key).is_none());
        assert!(log.borrow().closed.contains(&key));
    }

    #[test]
    fn test_repeated_bitfield_is_ignored() {
        let (mut client, _log) = leecher();
        let key = PeerKey(1);
        connect_remote(&mut client, key, &remote_bitfield(&[0]));

        let second = remote_bitfield(&[1, 2]).to_bytes();
        deliver(&mut client, key, &PeerMessage::Bitfield { bitfield: second });

        let peer = client.peers().get(key).unwrap();
        assert!(peer.has_piece(PieceIndex::new(0)));
        assert!(!peer.has_piece(PieceIndex::new(1)));
    }

    #[test]
    fn test_remote_choke_drops_requests_without_cancel() {
        let (mut client, log) = leecher();
        let key = PeerKey(1);
        let all: Vec<u32> = (0..client.media().piece_count()).collect();
        connect_remote(&mut client, key, &remote_bitfield(&all));
        deliver(&mut client, key, &PeerMessage::Unchoke);
        assert!(!client.peers().get(key).unwrap().outstanding().is_empty());

        log.borrow_mut().clear_sent();
        deliver(&mut client, key, &PeerMessage::Choke);

        let peer = client.peers().get(key).unwrap();
        assert!(peer.peer_choking());
        assert!(peer.outstanding().is_empty());
        let bitfield_size = client.media().bitfield_size();
        let sent = log.borrow().messages_to(key, bitfield_size);
        assert!(!sent.iter().any(|m| matches!(m, PeerMessage::Cancel(_))));
    }
}
