//! Piece selection policies.
//!
//! Pickers only decide which new piece to start with a peer. Continuing
//! in-progress pieces and honoring request limits is the part-selection
//! driver's job.

use crate::bitfield::{Bitfield, PieceBitfield};
use crate::protocol::PieceIndex;

/// Chooses the next piece to start downloading from a peer.
pub trait PiecePicker {
    /// Picks among pieces `local` lacks and `peer` has, restricted to those
    /// for which `eligible` returns true. `availability[i]` is the number of
    /// connected peers holding piece `i`.
    fn pick(
        &self,
        local: &PieceBitfield,
        peer: &Bitfield,
        availability: &[u32],
        eligible: &dyn Fn(PieceIndex) -> bool,
    ) -> Option<PieceIndex>;
}

/// In-order selection: lowest missing index first.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialPicker;

impl PiecePicker for SequentialPicker {
    fn pick(
        &self,
        local: &PieceBitfield,
        peer: &Bitfield,
        _availability: &[u32],
        eligible: &dyn Fn(PieceIndex) -> bool,
    ) -> Option<PieceIndex> {
        local
            .missing_pieces()
            .find(|piece| peer.has_piece(*piece) && eligible(*piece))
    }
}

/// Rarest-first selection: fewest holders, lowest index on ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct RarestFirstPicker;

impl PiecePicker for RarestFirstPicker {
    fn pick(
        &self,
        local: &PieceBitfield,
        peer: &Bitfield,
        availability: &[u32],
        eligible: &dyn Fn(PieceIndex) -> bool,
    ) -> Option<PieceIndex> {
        local
            .missing_pieces()
            .filter(|piece| peer.has_piece(*piece) && eligible(*piece))
            .min_by_key(|piece| {
                let holders = availability.get(piece.as_usize()).copied().unwrap_or(0);
                (holders, piece.as_u32())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_mocks::{remote_bitfield, test_media};

    fn availability(peers: &[&Bitfield]) -> Vec<u32> {
        let count = test_media().piece_count();
        (0..count)
            .map(|i| {
                peers
                    .iter()
                    .filter(|bits| bits.has_piece(PieceIndex::new(i)))
                    .count() as u32
            })
            .collect()
    }

    #[test]
    fn test_rarest_first_prefers_fewest_holders() {
        let local = PieceBitfield::empty(&test_media());
        let p1 = remote_bitfield(&[0, 1]);
        let p2 = remote_bitfield(&[1]);
        let counts = availability(&[&p1, &p2]);

        let picked = RarestFirstPicker.pick(&local, &p1, &counts, &|_| true);
        assert_eq!(picked, Some(PieceIndex::new(0)));
    }

    #[test]
    fn test_rarest_first_breaks_ties_by_lowest_index() {
        let local = PieceBitfield::empty(&test_media());
        let peer = remote_bitfield(&[7, 3, 5]);
        let counts = availability(&[&peer]);

        let picked = RarestFirstPicker.pick(&local, &peer, &counts, &|_| true);
        assert_eq!(picked, Some(PieceIndex::new(3)));
    }

    #[test]
    fn test_sequential_skips_ineligible_pieces() {
        let local = PieceBitfield::empty(&test_media());
        let peer = remote_bitfield(&[2, 4, 9]);

        let picked = SequentialPicker.pick(&local, &peer, &[], &|piece| piece.as_u32() != 2);
        assert_eq!(picked, Some(PieceIndex::new(4)));
    }

    #[test]
    fn test_pickers_return_none_when_peer_has_nothing_new() {
        let local = PieceBitfield::empty(&test_media());
        let peer = remote_bitfield(&[]);
        assert_eq!(SequentialPicker.pick(&local, &peer, &[], &|_| true), None);
        assert_eq!(RarestFirstPicker.pick(&local, &peer, &[0; 10], &|_| true), None);
    }
}
