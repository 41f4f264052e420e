//! Local piece bitfield with completion accounting

use std::collections::BTreeMap;

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{Bitfield, FillPolicy};
use crate::media::MediaData;
use crate::protocol::PieceIndex;

/// The local client's piece bitmap.
///
/// Bits past the last piece in the final byte are always set, so a bitfield
/// whose bytes are all `0xFF` is complete. Counters are maintained
/// incrementally by [`PieceBitfield::set_piece_complete`].
#[derive(Debug, Clone)]
pub struct PieceBitfield {
    bits: Bitfield,
    padding_bits: u8,
    pieces_completed: u32,
    bytes_completed: u64,
    download_completed: bool,
    completion_window: usize,
    piece_length: u32,
    trailing_piece_length: u32,
}

impl PieceBitfield {
    /// Builds the bitfield for `media` at startup.
    ///
    /// Applies `policy`, then every byte override whose index addresses both
    /// an existing byte and an existing piece, then forces the padding bits.
    /// `overrides` is consumed. `pull_window_bytes` limits the leading byte
    /// range checked for completion; `None` checks the whole bitfield.
    pub fn build<R: Rng>(
        media: &MediaData,
        policy: &FillPolicy,
        overrides: BTreeMap<u32, u8>,
        pull_window_bytes: Option<usize>,
        rng: &mut R,
    ) -> Self {
        let piece_count = media.piece_count();
        let mut bits = Bitfield::new(piece_count);
        policy.apply(bits.bytes_mut(), piece_count, rng);

        let byte_len = bits.as_bytes().len();
        for (index, value) in overrides {
            if index < piece_count && (index as usize) < byte_len {
                bits.bytes_mut()[index as usize] = value;
            } else {
                tracing::warn!(index, value, "Skipping out-of-range bitfield override");
            }
        }

        let padding_bits = match piece_count % 8 {
            0 => 0,
            used => 8 - used as u8,
        };
        if padding_bits > 0 {
            if let Some(last) = bits.bytes_mut().last_mut() {
                *last |= (1u8 << padding_bits) - 1;
            }
        }

        let set_bits: u32 = bits.as_bytes().iter().map(|byte| count_set_bits(*byte)).sum();
        let pieces_completed = set_bits - padding_bits as u32;

        let mut bytes_completed = pieces_completed as u64 * media.piece_length() as u64;
        let last = PieceIndex::new(piece_count.saturating_sub(1));
        if media.has_trailing_piece() && bits.has_piece(last) {
            bytes_completed =
                bytes_completed - media.piece_length() as u64 + media.trailing_piece_length() as u64;
        }

        let mut bitfield = Self {
            bits,
            padding_bits,
            pieces_completed,
            bytes_completed,
            download_completed: false,
            completion_window: pull_window_bytes.unwrap_or(byte_len).min(byte_len),
            piece_length: media.piece_length(),
            trailing_piece_length: media.trailing_piece_length(),
        };
        bitfield.download_completed = bitfield.window_full();
        bitfield
    }

    /// An all-empty bitfield, used before the client has started.
    pub fn empty(media: &MediaData) -> Self {
        Self::build(
            media,
            &FillPolicy::Empty,
            BTreeMap::new(),
            None,
            &mut ChaCha8Rng::seed_from_u64(0),
        )
    }

    /// Marks a piece complete and updates the counters.
    ///
    /// Returns `false` without changing anything when the piece was already
    /// complete.
    ///
    /// # Panics
    ///
    /// Panics if `piece` is not below the piece count.
    pub fn set_piece_complete(&mut self, piece: PieceIndex) -> bool {
        let piece_count = self.bits.piece_count();
        assert!(
            piece.as_u32() < piece_count,
            "piece {piece} out of range for {piece_count} pieces"
        );
        if !self.bits.set_piece(piece) {
            return false;
        }

        self.pieces_completed += 1;
        self.bytes_completed += self.piece_len(piece) as u64;
        self.download_completed = self.window_full();
        true
    }

    fn piece_len(&self, piece: PieceIndex) -> u32 {
        if self.trailing_piece_length > 0 && piece.as_u32() + 1 == self.bits.piece_count() {
            self.trailing_piece_length
        } else {
            self.piece_length
        }
    }

    fn window_full(&self) -> bool {
        self.bits.as_bytes()[..self.completion_window]
            .iter()
            .all(|byte| *byte == 0xff)
    }

    /// Whether the local client owns `piece`.
    pub fn has_piece(&self, piece: PieceIndex) -> bool {
        self.bits.has_piece(piece)
    }

    /// Number of pieces covered.
    pub fn piece_count(&self) -> u32 {
        self.bits.piece_count()
    }

    /// Byte length of the bitmap.
    pub fn byte_len(&self) -> usize {
        self.bits.as_bytes().len()
    }

    /// Raw bytes, padding bits included.
    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_bytes()
    }

    /// Copy of the raw bytes for a bitfield message.
    pub fn to_bytes(&self) -> Bytes {
        self.bits.to_bytes()
    }

    /// Completed piece count, padding excluded.
    pub fn pieces_completed(&self) -> u32 {
        self.pieces_completed
    }

    /// Completed byte count, trailing piece at its real length.
    pub fn bytes_completed(&self) -> u64 {
        self.bytes_completed
    }

    /// Number of padding bits forced at construction.
    pub fn padding_bits(&self) -> u8 {
        self.padding_bits
    }

    /// Whether every byte of the completion window is full.
    pub fn download_completed(&self) -> bool {
        self.download_completed
    }

    /// Pieces not yet owned, ascending.
    pub fn missing_pieces(&self) -> impl Iterator<Item = PieceIndex> + '_ {
        (0..self.bits.piece_count())
            .map(PieceIndex::new)
            .filter(|piece| !self.bits.has_piece(*piece))
    }
}

/// Population count with a fast path for full bytes.
fn count_set_bits(byte: u8) -> u32 {
    if byte == 0xff {
        return 8;
    }
    let mut remaining = byte;
    let mut count = 0;
    while remaining != 0 {
        remaining &= remaining - 1;
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SyntheticContent;

    /// 10 pieces of 1000 bytes, the last one 500 bytes.
    fn media() -> MediaData {
        MediaData::synthesize("clip", 9_500, 1_000, &SyntheticContent::new(1)).unwrap()
    }

    fn build(policy: FillPolicy, overrides: BTreeMap<u32, u8>) -> PieceBitfield {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        PieceBitfield::build(&media(), &policy, overrides, None, &mut rng)
    }

    #[test]
    fn test_full_policy_completes_download() {
        let bitfield = build(FillPolicy::Full, BTreeMap::new());
        assert!(bitfield.download_completed());
        assert_eq!(bitfield.pieces_completed(), 10);
        assert_eq!(bitfield.bytes_completed(), 9_500);
    }

    #[test]
    fn test_empty_policy_sets_only_padding() {
        let bitfield = build(FillPolicy::Empty, BTreeMap::new());
        assert!(!bitfield.download_completed());
        assert_eq!(bitfield.pieces_completed(), 0);
        assert_eq!(bitfield.bytes_completed(), 0);
        assert_eq!(bitfield.padding_bits(), 6);
        assert_eq!(bitfield.as_bytes(), &[0x00, 0b0011_1111]);
    }

    #[test]
    fn test_set_piece_complete_counts_trailing_length() {
        let mut bitfield = build(FillPolicy::Empty, BTreeMap::new());

        assert!(bitfield.set_piece_complete(PieceIndex::new(9)));
        assert_eq!(bitfield.pieces_completed(), 1);
        assert_eq!(bitfield.bytes_completed(), 500);

        assert!(bitfield.set_piece_complete(PieceIndex::new(0)));
        assert_eq!(bitfield.pieces_completed(), 2);
        assert_eq!(bitfield.bytes_completed(), 1_500);
    }

    #[test]
    fn test_set_piece_complete_twice_is_noop() {
        let mut bitfield = build(FillPolicy::Empty, BTreeMap::new());
        assert!(bitfield.set_piece_complete(PieceIndex::new(4)));
        assert!(!bitfield.set_piece_complete(PieceIndex::new(4)));
        assert_eq!(bitfield.pieces_completed(), 1);
    }

    #[test]
    fn test_completing_every_piece_flags_download() {
        let mut bitfield = build(FillPolicy::Empty, BTreeMap::new());
        for index in 0..10 {
            bitfield.set_piece_complete(PieceIndex::new(index));
        }
        assert!(bitfield.download_completed());
        assert_eq!(bitfield.missing_pieces().count(), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_set_piece_complete_out_of_range_panics() {
        let mut bitfield = build(FillPolicy::Empty, BTreeMap::new());
        bitfield.set_piece_complete(PieceIndex::new(10));
    }

    #[test]
    fn test_overrides_apply_then_padding() {
        let overrides = BTreeMap::from([(0, 0xf0), (1, 0x80), (12, 0xff)]);
        let bitfield = build(FillPolicy::Empty, overrides);
        assert_eq!(bitfield.as_bytes(), &[0xf0, 0xbf]);
        assert_eq!(bitfield.pieces_completed(), 5);
        assert_eq!(bitfield.bytes_completed(), 5_000);
    }

    #[test]
    fn test_trailing_piece_from_fill_uses_short_length() {
        let overrides = BTreeMap::from([(1, 0x40)]);
        let bitfield = build(FillPolicy::Empty, overrides);
        assert!(bitfield.has_piece(PieceIndex::new(9)));
        assert_eq!(bitfield.bytes_completed(), 500);
    }

    #[test]
    fn test_pull_window_limits_completion_check() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let overrides = BTreeMap::from([(0, 0xff)]);
        let bitfield =
            PieceBitfield::build(&media(), &FillPolicy::Empty, overrides, Some(1), &mut rng);
        assert!(bitfield.download_completed());
        assert_eq!(bitfield.pieces_completed(), 8);
    }

    #[test]
    fn test_count_set_bits_matches_count_ones() {
        for byte in 0..=u8::MAX {
            assert_eq!(count_set_bits(byte), byte.count_ones());
        }
    }
}
