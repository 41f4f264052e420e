//! Piece ownership bitmaps.
//!
//! [`Bitfield`] is a plain MSB-first bitmap used for what remote peers
//! advertise. [`PieceBitfield`] is the local client's bitmap with completion
//! accounting and the trailing-padding invariant.

mod fill;
mod local;

pub use fill::FillPolicy;
pub use local::PieceBitfield;

use bytes::Bytes;

use crate::protocol::{PieceIndex, WireError};

/// Bit position of `index` within its byte, most significant bit first.
pub(crate) fn bit_mask(index: u32) -> u8 {
    1 << (7 - (index % 8))
}

/// Bitfield representing which pieces a peer has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: u32,
}

impl Bitfield {
    /// Create empty bitfield for given number of pieces.
    pub fn new(piece_count: u32) -> Self {
        Self {
            bits: vec![0u8; piece_count.div_ceil(8) as usize],
            piece_count,
        }
    }

    /// Create bitfield from raw bytes received from a peer.
    ///
    /// # Errors
    ///
    /// - `WireError::LengthMismatch` - Byte count does not match the piece count
    pub fn from_bytes(bits: &[u8], piece_count: u32) -> Result<Self, WireError> {
        let expected = piece_count.div_ceil(8) as usize;
        if bits.len() != expected {
            return Err(WireError::LengthMismatch {
                message: "bitfield",
                declared: bits.len(),
                expected,
            });
        }
        Ok(Self {
            bits: bits.to_vec(),
            piece_count,
        })
    }

    /// Check if the bitfield has a specific piece; padding bits never count.
    pub fn has_piece(&self, piece: PieceIndex) -> bool {
        let index = piece.as_u32();
        if index >= self.piece_count {
            return false;
        }
        self.bits[(index / 8) as usize] & bit_mask(index) != 0
    }

    /// Marks a piece as owned. Returns false if it was already set or out of range.
    pub fn set_piece(&mut self, piece: PieceIndex) -> bool {
        let index = piece.as_u32();
        if index >= self.piece_count || self.has_piece(piece) {
            return false;
        }
        self.bits[(index / 8) as usize] |= bit_mask(index);
        true
    }

    /// Number of pieces the bitfield covers.
    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Number of owned pieces, ignoring padding bits.
    pub fn count_pieces(&self) -> u32 {
        self.pieces().count() as u32
    }

    /// Whether every piece is owned.
    pub fn is_complete(&self) -> bool {
        self.count_pieces() == self.piece_count
    }

    /// Owned piece indices in ascending order.
    pub fn pieces(&self) -> impl Iterator<Item = PieceIndex> + '_ {
        (0..self.piece_count)
            .map(PieceIndex::new)
            .filter(|piece| self.has_piece(*piece))
    }

    /// Raw bytes as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Copy of the raw bytes for a bitfield message.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitfield_is_msb_first() {
        let mut bitfield = Bitfield::new(10);
        bitfield.set_piece(PieceIndex::new(0));
        bitfield.set_piece(PieceIndex::new(9));
        assert_eq!(bitfield.as_bytes(), &[0b1000_0000, 0b0100_0000]);
    }

    #[test]
    fn test_bitfield_ignores_padding_bits() {
        let bitfield = Bitfield::from_bytes(&[0xff, 0xff], 10).unwrap();
        assert!(bitfield.has_piece(PieceIndex::new(9)));
        assert!(!bitfield.has_piece(PieceIndex::new(10)));
        assert_eq!(bitfield.count_pieces(), 10);
        assert!(bitfield.is_complete());
    }

    #[test]
    fn test_bitfield_from_bytes_rejects_wrong_size() {
        assert!(matches!(
            Bitfield::from_bytes(&[0xff], 10),
            Err(WireError::LengthMismatch { expected: 2, .. })
        ));
    }

    #[test]
    fn test_set_piece_out_of_range_is_ignored() {
        let mut bitfield = Bitfield::new(4);
        assert!(!bitfield.set_piece(PieceIndex::new(4)));
        assert!(bitfield.set_piece(PieceIndex::new(3)));
        assert!(!bitfield.set_piece(PieceIndex::new(3)));
        assert_eq!(bitfield.pieces().collect::<Vec<_>>(), vec![PieceIndex::new(3)]);
    }
}
