//! Upload queue and our side of the choke and interest state.
//!
//! Uploads are queued and sent when their zero-delay timer fires, so a
//! transfer never completes inside the handler that started it.

use std::time::Duration;

use super::Client;
use crate::events::{Channel, PeerBlock};
use crate::peers::PeerKey;
use crate::protocol::{BlockRequest, PeerMessage};
use crate::services::{ClientTimer, TimerId, UploadId};

#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingUpload {
    peer: PeerKey,
    block: BlockRequest,
    timer: TimerId,
}

impl Client {
    /// Queues `block` for upload to `peer`.
    ///
    /// Returns `None` when the peer is gone, the piece is not owned or the
    /// block does not fit the piece or the send block size.
    pub fn start_block_upload(&mut self, peer: PeerKey, block: BlockRequest) -> Option<UploadId> {
        let fits = block.piece.as_u32() < self.media.piece_count()
            && block.length > 0
            && block.length <= self.config.send_block_size
            && u64::from(block.offset) + u64::from(block.length)
                <= u64::from(self.media.piece_len(block.piece));
        let peer_active = self.peers.get(peer).is_some_and(|remote| remote.is_active());
        if !fits || !peer_active || !self.bitfield.has_piece(block.piece) {
            tracing::debug!(node = %self.node.id, %peer, ?block, "Rejecting upload");
            return None;
        }

        let upload = UploadId(self.downloads.next_upload);
        self.downloads.next_upload += 1;
        let timer = self.schedule(Duration::ZERO, ClientTimer::UploadBlock { upload });
        self.downloads
            .uploads
            .insert(upload, PendingUpload { peer, block, timer });
        Some(upload)
    }

    /// Drops a queued upload of `block` to `peer`. Returns false if none was queued.
    pub fn abort_block_upload(&mut self, peer: PeerKey, block: BlockRequest) -> bool {
        let found = self
            .downloads
            .uploads
            .iter()
            .find(|(_, pending)| pending.peer == peer && pending.block == block)
            .map(|(upload, pending)| (*upload, pending.timer));
        match found {
            Some((upload, timer)) => {
                self.downloads.uploads.remove(&upload);
                self.cancel_timer(timer);
                true
            }
            None => false,
        }
    }

    /// Uploads queued but not yet sent.
    pub fn pending_uploads(&self) -> usize {
        self.downloads.uploads.len()
    }

    pub(crate) fn abort_uploads_to(&mut self, peer: PeerKey) {
        let aborted: Vec<(UploadId, TimerId)> = self
            .downloads
            .uploads
            .iter()
            .filter(|(_, pending)| pending.peer == peer)
            .map(|(upload, pending)| (*upload, pending.timer))
            .collect();
        for (upload, timer) in aborted {
            self.downloads.uploads.remove(&upload);
            self.cancel_timer(timer);
        }
    }

    pub(crate) fn send_pending_upload(&mut self, upload: UploadId) {
        let Some(PendingUpload { peer, block, .. }) = self.downloads.uploads.remove(&upload) else {
            return;
        };
        if self.peers.get(peer).is_none_or(|remote| !remote.is_active()) {
            return;
        }
        let offset = self.media.piece_offset(block.piece) + u64::from(block.offset);
        let data = match self.services.storage.read(offset, block.length) {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(node = %self.node.id, %peer, ?block, %error, "Upload read failed");
                return;
            }
        };
        self.send_message(
            peer,
            &PeerMessage::Piece {
                piece: block.piece,
                offset: block.offset,
                data,
            },
        );
        if let Some(remote) = self.peers.get_mut(peer) {
            remote.uploaded_bytes += u64::from(block.length);
        }
        Channel::fire_in(self, |c| &c.events.block_upload_complete, &PeerBlock { peer, block });
    }

    /// Chokes or unchokes `peer`. Returns false if nothing changed.
    ///
    /// Choking drops every upload queued for the peer.
    pub fn set_choking(&mut self, peer: PeerKey, choking: bool) -> bool {
        let Some(remote) = self.peers.get_mut(peer) else {
            return false;
        };
        if !remote.is_active() || remote.am_choking == choking {
            return false;
        }
        remote.am_choking = choking;
        let message = if choking {
            PeerMessage::Choke
        } else {
            PeerMessage::Unchoke
        };
        self.send_message(peer, &message);
        if choking {
            self.abort_uploads_to(peer);
        }
        true
    }

    /// Declares or withdraws interest in `peer`. Returns false if nothing changed.
    pub fn set_interested(&mut self, peer: PeerKey, interested: bool) -> bool {
        let Some(remote) = self.peers.get_mut(peer) else {
            return false;
        };
        if !remote.is_active() || remote.am_interested == interested {
            return false;
        }
        remote.am_interested = interested;
        let message = if interested {
            PeerMessage::Interested
        } else {
            PeerMessage::NotInterested
        };
        self.send_message(peer, &message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_mocks::{connect_remote, remote_bitfield, started_client};
    use crate::config::ClientConfig;
    use crate::protocol::PieceIndex;

    fn seeder_with_peer() -> (Client, PeerKey) {
        let config = ClientConfig {
            protocol: "give-to-get".to_string(),
            initial_bitfield: "full".to_string(),
            ..ClientConfig::for_testing()
        };
        let (mut client, _log) = started_client(config).unwrap();
        let peer = PeerKey(1);
        connect_remote(&mut client, peer, &remote_bitfield(&[]));
        (client, peer)
    }

    #[test]
    fn test_upload_rejects_blocks_outside_piece_or_size() {
        let (mut client, peer) = seeder_with_peer();
        let piece = PieceIndex::new(0);

        assert!(client.start_block_upload(peer, BlockRequest::new(piece, 0, 0)).is_none());
        assert!(client.start_block_upload(peer, BlockRequest::new(piece, 0, 2_048)).is_none());
        assert!(client.start_block_upload(peer, BlockRequest::new(piece, 900, 200)).is_none());
        assert!(client.start_block_upload(PeerKey(9), BlockRequest::new(piece, 0, 100)).is_none());
        assert_eq!(client.pending_uploads(), 0);
    }

    #[test]
    fn test_abort_removes_only_matching_upload() {
        let (mut client, peer) = seeder_with_peer();
        let first = BlockRequest::new(PieceIndex::new(0), 0, 500);
        let second = BlockRequest::new(PieceIndex::new(1), 0, 500);
        client.start_block_upload(peer, first).unwrap();
        client.start_block_upload(peer, second).unwrap();

        assert!(client.abort_block_upload(peer, first));
        assert!(!client.abort_block_upload(peer, first));
        assert_eq!(client.pending_uploads(), 1);
    }

    #[test]
    fn test_choking_drops_queued_uploads() {
        let (mut client, peer) = seeder_with_peer();
        assert!(client.set_choking(peer, false));
        assert!(!client.set_choking(peer, false));
        client
            .start_block_upload(peer, BlockRequest::new(PieceIndex::new(2), 0, 500))
            .unwrap();

        assert!(client.set_choking(peer, true));
        assert_eq!(client.pending_uploads(), 0);
    }
}
