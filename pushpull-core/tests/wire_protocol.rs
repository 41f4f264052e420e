//! Wire protocol and bitfield behavior through the public API.

use std::collections::BTreeMap;

use bytes::BytesMut;
use proptest::prelude::*;
use pushpull_core::protocol::{Handshake, MessageCodec, WireMessage};
use pushpull_core::{
    Bitfield, BlockRequest, FillPolicy, MediaData, PeerId, PeerMessage, PieceBitfield, PieceIndex,
    SyntheticContent, WireError,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn media() -> MediaData {
    MediaData::synthesize("clip", 9_500, 1_000, &SyntheticContent::new(7)).unwrap()
}

#[test]
fn test_handshake_then_messages_share_one_stream() {
    let media = media();
    let handshake = Handshake::new(media.info_hash(), PeerId::from_text("VODSim-2-17"));
    let mut stream = BytesMut::new();
    handshake.serialize(&mut stream);
    stream.extend_from_slice(&MessageCodec::encode(&PeerMessage::Interested));
    stream.extend_from_slice(&MessageCodec::encode(&PeerMessage::Have {
        piece: PieceIndex::new(4),
    }));

    let handshake_len = Handshake::complete_len(&stream).unwrap();
    let mut received = Handshake::default();
    received.deserialize(&stream[..handshake_len]).unwrap();
    assert_eq!(received.info_hash, media.info_hash());
    assert_eq!(received.peer_id, PeerId::from_text("VODSim-2-17"));

    let rest = &stream[handshake_len..];
    let (first, used) = MessageCodec::decode_frame(rest, media.bitfield_size()).unwrap();
    let (second, _) = MessageCodec::decode_frame(&rest[used..], media.bitfield_size()).unwrap();
    assert_eq!(first, PeerMessage::Interested);
    assert_eq!(
        second,
        PeerMessage::Have {
            piece: PieceIndex::new(4)
        }
    );
}

#[test]
fn test_partial_frame_waits_for_more_bytes() {
    let request = PeerMessage::Request(BlockRequest::new(PieceIndex::new(3), 1_024, 1_024));
    let frame = MessageCodec::encode(&request);

    assert_eq!(MessageCodec::frame_len(&frame[..7]), None);
    assert_eq!(MessageCodec::frame_len(&frame), Some(frame.len()));
}

#[test]
fn test_bitfield_frame_size_comes_from_metadata() {
    let media = media();
    let mut remote = Bitfield::new(media.piece_count());
    remote.set_piece(PieceIndex::new(0));
    remote.set_piece(PieceIndex::new(9));
    let frame = MessageCodec::encode(&PeerMessage::Bitfield {
        bitfield: remote.to_bytes(),
    });

    let (message, _) = MessageCodec::decode_frame(&frame, media.bitfield_size()).unwrap();
    let PeerMessage::Bitfield { bitfield } = message else {
        panic!("expected a bitfield, got {message:?}");
    };
    let decoded = Bitfield::from_bytes(&bitfield, media.piece_count()).unwrap();
    let pieces: Vec<u32> = decoded.pieces().map(PieceIndex::as_u32).collect();
    assert_eq!(pieces, vec![0, 9]);

    assert!(matches!(
        MessageCodec::decode_frame(&frame, media.bitfield_size() + 1),
        Err(WireError::LengthMismatch { .. })
    ));
}

#[test]
fn test_local_bitfield_counts_trailing_piece_at_real_length() {
    let media = media();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let overrides = BTreeMap::from([(1, 0b1100_0000)]);
    let bitfield = PieceBitfield::build(&media, &FillPolicy::Empty, overrides, None, &mut rng);

    // Byte 1 holds pieces 8 and 9; the trailing piece is 500 bytes.
    assert_eq!(bitfield.pieces_completed(), 2);
    assert_eq!(bitfield.bytes_completed(), 1_500);
    assert_eq!(bitfield.padding_bits(), 6);
    assert_eq!(bitfield.as_bytes(), &[0x00, 0xff]);
    assert!(!bitfield.download_completed());
}

#[test]
fn test_pull_window_completes_on_leading_bytes() {
    let media = media();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let overrides = BTreeMap::from([(0, 0xff)]);
    let bitfield = PieceBitfield::build(&media, &FillPolicy::Empty, overrides, Some(1), &mut rng);

    assert_eq!(bitfield.pieces_completed(), 8);
    assert!(bitfield.download_completed());
}

#[test]
fn test_fill_policy_strings() {
    assert_eq!("empty".parse::<FillPolicy>().unwrap(), FillPolicy::Empty);
    assert_eq!("full".parse::<FillPolicy>().unwrap(), FillPolicy::Full);
    assert_eq!(
        "random:0.5".parse::<FillPolicy>().unwrap(),
        FillPolicy::Random { fraction: 0.5 }
    );
    assert!("random:2".parse::<FillPolicy>().is_err());
}

proptest! {
    #[test]
    fn test_decoder_never_consumes_past_input(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        if let Ok((_, consumed)) = MessageCodec::decode_frame(&data, 2) {
            prop_assert!(consumed <= data.len());
        }
    }
}
