//! Block requests and piece assembly.
//!
//! Every in-progress piece tracks each block as missing, requested by some
//! number of peers, or received. Requests to one peer for one piece share a
//! timeout timer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bytes::Bytes;

use super::Client;
use super::upload::PendingUpload;
use crate::events::{Channel, PeerBlock, PeerPiece};
use crate::media::sha1_digest;
use crate::peers::PeerKey;
use crate::protocol::{BlockRequest, PeerMessage, PieceIndex};
use crate::services::{ClientTimer, TimerId, UploadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Missing,
    Requested(usize),
    Received,
}

/// Assembly state of one piece.
#[derive(Debug)]
struct PieceProgress {
    length: u32,
    block_size: u32,
    blocks: Vec<BlockState>,
    data: Vec<u8>,
}

impl PieceProgress {
    fn new(length: u32, block_size: u32) -> Self {
        let count = length.div_ceil(block_size) as usize;
        Self {
            length,
            block_size,
            blocks: vec![BlockState::Missing; count],
            data: vec![0; length as usize],
        }
    }

    fn block(&self, piece: PieceIndex, index: usize) -> BlockRequest {
        let offset = index as u32 * self.block_size;
        BlockRequest::new(piece, offset, self.block_size.min(self.length - offset))
    }

    fn index_of(&self, offset: u32, length: u32) -> Option<usize> {
        if offset % self.block_size != 0 {
            return None;
        }
        let index = (offset / self.block_size) as usize;
        let expected = self.block_size.min(self.length.checked_sub(offset)?);
        (index < self.blocks.len() && length == expected).then_some(index)
    }

    /// Blocks `peer_requests` does not already cover, with fewer than
    /// `per_block` requests in flight.
    fn requestable<'a>(
        &'a self,
        piece: PieceIndex,
        per_block: usize,
        peer_requests: &'a BTreeSet<BlockRequest>,
    ) -> impl Iterator<Item = BlockRequest> + 'a {
        self.blocks
            .iter()
            .enumerate()
            .filter(move |(_, state)| match state {
                BlockState::Missing => true,
                BlockState::Requested(count) => *count < per_block,
                BlockState::Received => false,
            })
            .map(move |(index, _)| self.block(piece, index))
            .filter(move |block| !peer_requests.contains(block))
    }

    fn mark_requested(&mut self, index: usize) {
        self.blocks[index] = match self.blocks[index] {
            BlockState::Missing => BlockState::Requested(1),
            BlockState::Requested(count) => BlockState::Requested(count + 1),
            BlockState::Received => BlockState::Received,
        };
    }

    fn release(&mut self, index: usize) {
        if let BlockState::Requested(count) = self.blocks[index] {
            self.blocks[index] = if count <= 1 {
                BlockState::Missing
            } else {
                BlockState::Requested(count - 1)
            };
        }
    }

    fn store(&mut self, index: usize, data: &[u8]) {
        let start = index * self.block_size as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        self.blocks[index] = BlockState::Received;
    }

    fn is_complete(&self) -> bool {
        self.blocks.iter().all(|state| *state == BlockState::Received)
    }
}

/// Download and upload bookkeeping owned by a client.
#[derive(Debug, Default)]
pub(crate) struct Downloads {
    pieces: BTreeMap<PieceIndex, PieceProgress>,
    timeouts: HashMap<(PeerKey, PieceIndex), TimerId>,
    pub(super) uploads: BTreeMap<UploadId, PendingUpload>,
    pub(super) next_upload: u64,
}

impl Client {
    /// Pieces with assembly state, ascending.
    pub fn in_progress_pieces(&self) -> Vec<PieceIndex> {
        self.downloads.pieces.keys().copied().collect()
    }

    /// Whether some block of `piece` was requested or received.
    pub fn is_piece_in_progress(&self, piece: PieceIndex) -> bool {
        self.downloads.pieces.contains_key(&piece)
    }

    /// Peers with outstanding requests for `piece`.
    pub fn peers_on_piece(&self, piece: PieceIndex) -> usize {
        self.peers
            .iter()
            .filter(|peer| peer.outstanding_for(piece) > 0)
            .count()
    }

    /// Whether `peer` unchoked us and has room for another request.
    pub fn can_request_more(&self, peer: PeerKey) -> bool {
        self.peers.get(peer).is_some_and(|remote| {
            remote.is_active()
                && !remote.peer_choking()
                && remote.outstanding().len() < self.config.max_requests_per_peer
        })
    }

    /// Whether [`Client::request_piece`] would request at least one block.
    pub fn has_requestable_blocks(&self, peer: PeerKey, piece: PieceIndex) -> bool {
        !self.requestable_blocks(peer, piece).is_empty()
    }

    /// Requests as many blocks of `piece` from `peer` as the limits allow.
    ///
    /// Returns the number of requests sent. Starts assembly state for pieces
    /// that have none yet and arms the piece timeout for the peer.
    pub fn request_piece(&mut self, peer: PeerKey, piece: PieceIndex) -> usize {
        let blocks = self.requestable_blocks(peer, piece);
        if blocks.is_empty() {
            return 0;
        }

        let length = self.media.piece_len(piece);
        let block_size = self.config.request_block_size;
        let progress = self
            .downloads
            .pieces
            .entry(piece)
            .or_insert_with(|| PieceProgress::new(length, block_size));
        let blocks: Vec<BlockRequest> = blocks
            .into_iter()
            .filter_map(|block| {
                let index = progress.index_of(block.offset, block.length)?;
                progress.mark_requested(index);
                Some(block)
            })
            .collect();

        if let Some(remote) = self.peers.get_mut(peer) {
            remote.outstanding.extend(blocks.iter().copied());
        }
        for block in &blocks {
            self.send_message(peer, &PeerMessage::Request(*block));
        }
        if !self.downloads.timeouts.contains_key(&(peer, piece)) {
            let timeout = self.config.piece_timeout;
            let timer = self.schedule(timeout, ClientTimer::PieceTimeout { peer, piece });
            self.downloads.timeouts.insert((peer, piece), timer);
        }
        tracing::debug!(node = %self.node.id, %peer, %piece, count = blocks.len(), "Requested blocks");
        blocks.len()
    }

    fn requestable_blocks(&self, peer: PeerKey, piece: PieceIndex) -> Vec<BlockRequest> {
        if self.bitfield.has_piece(piece) || piece.as_u32() >= self.media.piece_count() {
            return Vec::new();
        }
        let Some(remote) = self.peers.get(peer) else {
            return Vec::new();
        };
        if !remote.is_active() || remote.peer_choking() || !remote.has_piece(piece) {
            return Vec::new();
        }

        let on_piece = remote.outstanding_for(piece);
        if on_piece == 0 && self.peers_on_piece(piece) >= self.config.max_requests_per_piece {
            return Vec::new();
        }
        let budget = self
            .config
            .max_requests_per_peer
            .saturating_sub(remote.outstanding().len())
            .min(self.config.max_requests_per_peer_per_piece.saturating_sub(on_piece));
        let per_block = self.config.max_requests_per_block.max(1);

        match self.downloads.pieces.get(&piece) {
            Some(progress) => progress
                .requestable(piece, per_block, remote.outstanding())
                .take(budget)
                .collect(),
            None => {
                let fresh =
                    PieceProgress::new(self.media.piece_len(piece), self.config.request_block_size);
                fresh
                    .requestable(piece, per_block, remote.outstanding())
                    .take(budget)
                    .collect()
            }
        }
    }

    /// Forgets requests to `peer`, for one piece or all, and releases their
    /// blocks. Returns what was forgotten; no message is sent.
    pub(crate) fn release_requests(
        &mut self,
        peer: PeerKey,
        piece: Option<PieceIndex>,
    ) -> Vec<BlockRequest> {
        let Some(remote) = self.peers.get_mut(peer) else {
            return Vec::new();
        };
        let released: Vec<BlockRequest> = remote
            .outstanding
            .iter()
            .filter(|block| piece.is_none_or(|piece| block.piece == piece))
            .copied()
            .collect();
        for block in &released {
            remote.outstanding.remove(block);
            if let Some(progress) = self.downloads.pieces.get_mut(&block.piece) {
                if let Some(index) = progress.index_of(block.offset, block.length) {
                    progress.release(index);
                }
            }
        }

        let pieces: BTreeSet<PieceIndex> = released.iter().map(|block| block.piece).collect();
        for piece in pieces {
            if let Some(timer) = self.downloads.timeouts.remove(&(peer, piece)) {
                self.cancel_timer(timer);
            }
        }
        released
    }

    /// Cancels outstanding requests for `piece` at every peer, firing
    /// piece-cancelled for each peer that had some.
    fn cancel_piece_requests(&mut self, piece: PieceIndex) {
        for peer in self.peers.keys() {
            let released = self.release_requests(peer, Some(piece));
            if released.is_empty() {
                continue;
            }
            for block in released {
                self.send_message(peer, &PeerMessage::Cancel(block));
            }
            Channel::fire_in(self, |c| &c.events.piece_cancelled, &PeerPiece { peer, piece });
        }
    }

    pub(crate) fn handle_piece_timeout(&mut self, peer: PeerKey, piece: PieceIndex) {
        self.downloads.timeouts.remove(&(peer, piece));
        if self.peers.get(peer).is_none() {
            return;
        }
        let released = self.release_requests(peer, Some(piece));
        tracing::debug!(node = %self.node.id, %peer, %piece, blocks = released.len(), "Piece timed out");
        for block in released {
            self.send_message(peer, &PeerMessage::Cancel(block));
        }
        Channel::fire_in(self, |c| &c.events.piece_timeout, &PeerPiece { peer, piece });
    }

    pub(crate) fn receive_block(
        &mut self,
        peer: PeerKey,
        piece: PieceIndex,
        offset: u32,
        data: Bytes,
    ) {
        let block = BlockRequest::new(piece, offset, data.len() as u32);
        let Some(remote) = self.peers.get_mut(peer) else {
            return;
        };
        if !remote.outstanding.remove(&block) {
            tracing::debug!(node = %self.node.id, %peer, %piece, offset, "Ignoring unrequested block");
            return;
        }
        remote.downloaded_bytes += data.len() as u64;
        if remote.outstanding_for(piece) == 0 {
            if let Some(timer) = self.downloads.timeouts.remove(&(peer, piece)) {
                self.cancel_timer(timer);
            }
        }

        let complete = match self.downloads.pieces.get_mut(&piece) {
            Some(progress) => {
                if let Some(index) = progress.index_of(offset, block.length) {
                    progress.store(index, &data);
                }
                progress.is_complete()
            }
            None => false,
        };
        if complete {
            self.finish_piece(peer, piece);
        }
        Channel::fire_in(self, |c| &c.events.block_transfer_complete, &PeerBlock { peer, block });
    }

    fn finish_piece(&mut self, from: PeerKey, piece: PieceIndex) {
        let Some(progress) = self.downloads.pieces.remove(&piece) else {
            return;
        };
        if self.config.check_downloaded_data {
            let verified = self
                .media
                .piece_hash(piece)
                .is_some_and(|expected| sha1_digest(&progress.data) == *expected);
            if !verified {
                tracing::warn!(node = %self.node.id, peer = %from, %piece, "Piece hash mismatch, discarding");
                self.cancel_piece_requests(piece);
                return;
            }
        }

        self.bitfield.set_piece_complete(piece);
        self.cancel_piece_requests(piece);
        for peer in self.peers.keys() {
            if self.peers.get(peer).is_some_and(|remote| remote.is_active()) {
                self.send_message(peer, &PeerMessage::Have { piece });
            }
        }
        tracing::debug!(
            node = %self.node.id,
            %piece,
            completed = self.bitfield.pieces_completed(),
            "Piece complete"
        );
        Channel::fire_in(self, |c| &c.events.piece_complete, &PeerPiece { peer: from, piece });

        if self.bitfield.download_completed() && !self.download_completed {
            self.complete_download();
        }
    }

    fn complete_download(&mut self) {
        self.download_completed = true;
        tracing::info!(
            node = %self.node.id,
            bytes = self.bitfield.bytes_completed(),
            "Download complete"
        );
        if let Some(connector) = self.connector() {
            connector.announce_as_seeder(self);
        }
        Channel::fire_in(self, |c| &c.events.download_complete, &());
        if let Some(duration) = self.config.seeding_duration {
            self.seeding_timer = Some(self.schedule(duration, ClientTimer::SeedingExpired));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_trailing_block_is_short() {
        let progress = PieceProgress::new(2_500, 1_024);
        assert_eq!(progress.blocks.len(), 3);
        let last = progress.block(PieceIndex::new(4), 2);
        assert_eq!((last.offset, last.length), (2_048, 452));
        assert_eq!(progress.index_of(2_048, 452), Some(2));
        assert_eq!(progress.index_of(2_048, 1_024), None);
        assert_eq!(progress.index_of(100, 1_024), None);
    }

    #[test]
    fn test_progress_respects_per_block_limit() {
        let piece = PieceIndex::new(0);
        let mut progress = PieceProgress::new(2_048, 1_024);
        progress.mark_requested(0);

        let none = BTreeSet::new();
        let single: Vec<_> = progress.requestable(piece, 1, &none).collect();
        assert_eq!(single, vec![BlockRequest::new(piece, 1_024, 1_024)]);

        let double: Vec<_> = progress.requestable(piece, 2, &none).collect();
        assert_eq!(double.len(), 2);

        let own = BTreeSet::from([BlockRequest::new(piece, 0, 1_024)]);
        assert_eq!(progress.requestable(piece, 2, &own).count(), 1);
    }

    #[test]
    fn test_progress_release_and_store() {
        let mut progress = PieceProgress::new(2_048, 1_024);
        progress.mark_requested(0);
        progress.mark_requested(0);
        progress.release(0);
        assert_eq!(progress.blocks[0], BlockState::Requested(1));
        progress.release(0);
        assert_eq!(progress.blocks[0], BlockState::Missing);

        progress.store(0, &[1; 1_024]);
        progress.store(1, &[2; 1_024]);
        progress.release(1);
        assert!(progress.is_complete());
        assert_eq!(progress.data[1_023], 1);
        assert_eq!(progress.data[1_024], 2);
    }
}
