//! Frame encoding and decoding for peer messages

use bytes::{Bytes, BytesMut};

use super::messages::{
    BitfieldMessage, BlockMessage, ExtensionMessage, HaveMessage, LengthHeader, PieceHeader,
    PortMessage, TypeHeader, WireMessage,
};
use super::{BlockRequest, MessageType, PeerMessage, WireError};

/// Largest extension payload accepted from a peer.
pub const MAX_EXTENSION_PAYLOAD: usize = 16 * 1024;

/// Length-prefixed frame codec for [`PeerMessage`].
pub struct MessageCodec;

impl MessageCodec {
    /// Serializes a message as `length | type | body`.
    pub fn encode(message: &PeerMessage) -> Bytes {
        let mut body = BytesMut::new();
        match message {
            PeerMessage::KeepAlive
            | PeerMessage::Choke
            | PeerMessage::Unchoke
            | PeerMessage::Interested
            | PeerMessage::NotInterested => {}
            PeerMessage::Have { piece } => HaveMessage { piece: *piece }.serialize(&mut body),
            PeerMessage::Bitfield { bitfield } => {
                BitfieldMessage::from_bytes(bitfield.clone()).serialize(&mut body)
            }
            PeerMessage::Request(block) | PeerMessage::Cancel(block) => BlockMessage {
                piece: block.piece,
                offset: block.offset,
                length: block.length,
            }
            .serialize(&mut body),
            PeerMessage::Piece {
                piece,
                offset,
                data,
            } => {
                PieceHeader {
                    piece: *piece,
                    offset: *offset,
                }
                .serialize(&mut body);
                body.extend_from_slice(data);
            }
            PeerMessage::Port { port } => PortMessage { port: *port }.serialize(&mut body),
            PeerMessage::Extension { id, payload } => {
                ExtensionMessage::new(*id, payload.clone()).serialize(&mut body)
            }
        }

        let mut frame = BytesMut::with_capacity(5 + body.len());
        match message.message_type() {
            None => LengthHeader(0).serialize(&mut frame),
            Some(kind) => {
                LengthHeader(1 + body.len() as u32).serialize(&mut frame);
                TypeHeader(kind).serialize(&mut frame);
                frame.extend_from_slice(&body);
            }
        }
        frame.freeze()
    }

    /// Returns the total frame size if `buf` starts with a complete frame.
    pub fn frame_len(buf: &[u8]) -> Option<usize> {
        let mut header = LengthHeader::default();
        header.deserialize(buf).ok()?;
        let total = 4 + header.0 as usize;
        (buf.len() >= total).then_some(total)
    }

    /// Largest declared frame length a peer may send.
    ///
    /// Covers a bitfield of `bitfield_size` bytes, a piece message carrying
    /// up to `max_block` bytes and an extension message at
    /// [`MAX_EXTENSION_PAYLOAD`].
    pub fn max_frame_len(bitfield_size: usize, max_block: usize) -> usize {
        1 + 8 + bitfield_size.max(max_block).max(MAX_EXTENSION_PAYLOAD + 1)
    }

    /// Checks the length header at the front of `buf` against `limit`.
    ///
    /// A buffer too short to hold the header passes.
    ///
    /// # Errors
    ///
    /// - `WireError::FrameTooLarge` - Declared length exceeds `limit`
    pub fn check_frame_limit(buf: &[u8], limit: usize) -> Result<(), WireError> {
        let mut header = LengthHeader::default();
        if header.deserialize(buf).is_err() {
            return Ok(());
        }
        let declared = header.0 as usize;
        if declared > limit {
            return Err(WireError::FrameTooLarge { declared, limit });
        }
        Ok(())
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// `bitfield_size` is the byte size a bitfield frame must carry; it is
    /// known from the shared metadata rather than the frame itself. Returns
    /// the message and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - `WireError::Truncated` - `buf` ends before the declared frame length
    /// - `WireError::LengthMismatch` - Declared length does not fit the message type
    /// - `WireError::UnknownMessageType` - Type byte outside the enumeration
    pub fn decode_frame(
        buf: &[u8],
        bitfield_size: usize,
    ) -> Result<(PeerMessage, usize), WireError> {
        let mut header = LengthHeader::default();
        let mut pos = header.deserialize(buf)?;
        let declared = header.0 as usize;
        WireError::ensure_available("frame", buf, pos + declared)?;

        if declared == 0 {
            return Ok((PeerMessage::KeepAlive, pos));
        }

        let frame = &buf[pos..pos + declared];
        let mut kind = TypeHeader::default();
        let consumed = kind.deserialize(frame)?;
        pos += declared;
        let body = &frame[consumed..];

        let message = match kind.0 {
            MessageType::Choke => Self::expect_empty("choke", body, PeerMessage::Choke)?,
            MessageType::Unchoke => Self::expect_empty("unchoke", body, PeerMessage::Unchoke)?,
            MessageType::Interested => {
                Self::expect_empty("interested", body, PeerMessage::Interested)?
            }
            MessageType::NotInterested => {
                Self::expect_empty("not interested", body, PeerMessage::NotInterested)?
            }
            MessageType::Have => {
                Self::expect_len("have", body, 4)?;
                let mut have = HaveMessage::default();
                have.deserialize(body)?;
                PeerMessage::Have { piece: have.piece }
            }
            MessageType::Bitfield => {
                Self::expect_len("bitfield", body, bitfield_size)?;
                let mut bitfield = BitfieldMessage::with_size(bitfield_size);
                bitfield.deserialize(body)?;
                PeerMessage::Bitfield {
                    bitfield: bitfield.bits,
                }
            }
            MessageType::Request | MessageType::Cancel => {
                Self::expect_len("block", body, 12)?;
                let mut block = BlockMessage::default();
                block.deserialize(body)?;
                let request = BlockRequest::new(block.piece, block.offset, block.length);
                if kind.0 == MessageType::Request {
                    PeerMessage::Request(request)
                } else {
                    PeerMessage::Cancel(request)
                }
            }
            MessageType::Piece => {
                let mut header = PieceHeader::default();
                let header_len = header.deserialize(body)?;
                PeerMessage::Piece {
                    piece: header.piece,
                    offset: header.offset,
                    data: Bytes::copy_from_slice(&body[header_len..]),
                }
            }
            MessageType::Port => {
                Self::expect_len("port", body, 2)?;
                let mut port = PortMessage::default();
                port.deserialize(body)?;
                PeerMessage::Port { port: port.port }
            }
            MessageType::Extension => {
                let mut extension = ExtensionMessage::with_packet_length(body.len());
                extension.deserialize(body)?;
                PeerMessage::Extension {
                    id: extension.id,
                    payload: extension.payload,
                }
            }
        };

        Ok((message, pos))
    }

    fn expect_empty(
        message: &'static str,
        body: &[u8],
        value: PeerMessage,
    ) -> Result<PeerMessage, WireError> {
        Self::expect_len(message, body, 0)?;
        Ok(value)
    }

    fn expect_len(message: &'static str, body: &[u8], expected: usize) -> Result<(), WireError> {
        if body.len() != expected {
            return Err(WireError::LengthMismatch {
                message,
                declared: body.len() + 1,
                expected: expected + 1,
            });
        }
        Ok(())
    }
}
