//! Per-message wire layouts.
//!
//! Each message is a value type that writes itself into a buffer and reads
//! itself back from a slice, reporting how many bytes it consumed. Messages
//! whose size is not self-describing (bitfield, extension) are sized up front
//! from the enclosing length prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{MessageType, PieceIndex, WireError};

/// Encode/decode contract shared by all wire messages.
pub trait WireMessage {
    /// Number of bytes `serialize` writes.
    fn serialized_len(&self) -> usize;

    /// Appends the message to `buf`.
    fn serialize(&self, buf: &mut BytesMut);

    /// Reads the message from the front of `buf`, returning bytes consumed.
    ///
    /// # Errors
    ///
    /// - `WireError::Truncated` - `buf` is shorter than the message
    /// - `WireError::UnknownMessageType` - Type byte outside the enumeration
    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError>;
}

/// 4-byte big-endian frame length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LengthHeader(pub u32);

impl WireMessage for LengthHeader {
    fn serialized_len(&self) -> usize {
        4
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.0);
    }

    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError> {
        WireError::ensure_available("length header", buf, 4)?;
        self.0 = (&buf[..4]).get_u32();
        Ok(4)
    }
}

/// 1-byte message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeHeader(pub MessageType);

impl WireMessage for TypeHeader {
    fn serialized_len(&self) -> usize {
        1
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u8(self.0.as_u8());
    }

    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError> {
        WireError::ensure_available("type header", buf, 1)?;
        self.0 = MessageType::try_from(buf[0])?;
        Ok(1)
    }
}

/// Have: the sender completed one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HaveMessage {
    pub piece: PieceIndex,
}

impl WireMessage for HaveMessage {
    fn serialized_len(&self) -> usize {
        4
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.piece.as_u32());
    }

    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError> {
        WireError::ensure_available("have", buf, 4)?;
        self.piece = PieceIndex::new((&buf[..4]).get_u32());
        Ok(4)
    }
}

/// Bitfield: raw ownership bytes of a size known out-of-band.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitfieldMessage {
    pub bits: Bytes,
    size: usize,
}

impl BitfieldMessage {
    /// Prepares an empty message that will decode exactly `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self {
            bits: Bytes::new(),
            size,
        }
    }

    /// Wraps bitfield bytes for sending.
    pub fn from_bytes(bits: Bytes) -> Self {
        let size = bits.len();
        Self { bits, size }
    }
}

impl WireMessage for BitfieldMessage {
    fn serialized_len(&self) -> usize {
        self.bits.len()
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.bits);
    }

    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError> {
        WireError::ensure_available("bitfield", buf, self.size)?;
        self.bits = Bytes::copy_from_slice(&buf[..self.size]);
        Ok(self.size)
    }
}

/// Request and Cancel body: piece index, block offset, block length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockMessage {
    pub piece: PieceIndex,
    pub offset: u32,
    pub length: u32,
}

impl WireMessage for BlockMessage {
    fn serialized_len(&self) -> usize {
        12
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.piece.as_u32());
        buf.put_u32(self.offset);
        buf.put_u32(self.length);
    }

    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError> {
        WireError::ensure_available("block", buf, 12)?;
        let mut cursor = &buf[..12];
        self.piece = PieceIndex::new(cursor.get_u32());
        self.offset = cursor.get_u32();
        self.length = cursor.get_u32();
        Ok(12)
    }
}

/// Piece header; the payload follows separately and is not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PieceHeader {
    pub piece: PieceIndex,
    pub offset: u32,
}

impl WireMessage for PieceHeader {
    fn serialized_len(&self) -> usize {
        8
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.piece.as_u32());
        buf.put_u32(self.offset);
    }

    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError> {
        WireError::ensure_available("piece header", buf, 8)?;
        let mut cursor = &buf[..8];
        self.piece = PieceIndex::new(cursor.get_u32());
        self.offset = cursor.get_u32();
        Ok(8)
    }
}

/// Port: the sender's listen port, 2 bytes in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortMessage {
    pub port: u16,
}

impl WireMessage for PortMessage {
    fn serialized_len(&self) -> usize {
        2
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16(self.port);
    }

    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError> {
        WireError::ensure_available("port", buf, 2)?;
        self.port = (&buf[..2]).get_u16();
        Ok(2)
    }
}

/// Extension: sub-message id plus `packet_length - 1` content bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionMessage {
    pub id: u8,
    pub payload: Bytes,
    packet_length: usize,
}

impl ExtensionMessage {
    /// Creates an extension message for sending.
    pub fn new(id: u8, payload: Bytes) -> Self {
        let packet_length = payload.len() + 1;
        Self {
            id,
            payload,
            packet_length,
        }
    }

    /// Prepares a message that will decode `packet_length` bytes (id included).
    pub fn with_packet_length(packet_length: usize) -> Self {
        Self {
            id: 0,
            payload: Bytes::new(),
            packet_length,
        }
    }
}

impl WireMessage for ExtensionMessage {
    fn serialized_len(&self) -> usize {
        1 + self.payload.len()
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u8(self.id);
        buf.extend_from_slice(&self.payload);
    }

    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError> {
        if self.packet_length == 0 {
            return Err(WireError::LengthMismatch {
                message: "extension",
                declared: 0,
                expected: 1,
            });
        }
        WireError::ensure_available("extension", buf, self.packet_length)?;
        self.id = buf[0];
        self.payload = Bytes::copy_from_slice(&buf[1..self.packet_length]);
        Ok(self.packet_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(message: &impl WireMessage) -> BytesMut {
        let mut buf = BytesMut::new();
        message.serialize(&mut buf);
        assert_eq!(buf.len(), message.serialized_len());
        buf
    }

    #[test]
    fn test_block_message_layout_is_three_big_endian_words() {
        let message = BlockMessage {
            piece: PieceIndex::new(1),
            offset: 0x4000,
            length: 0x4000,
        };
        let buf = encode(&message);
        assert_eq!(
            &buf[..],
            &[0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x40, 0][..]
        );

        let mut decoded = BlockMessage::default();
        assert_eq!(decoded.deserialize(&buf).unwrap(), 12);
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_piece_header_excludes_payload() {
        let header = PieceHeader {
            piece: PieceIndex::new(7),
            offset: 32,
        };
        let mut buf = encode(&header);
        buf.extend_from_slice(b"payload");

        let mut decoded = PieceHeader::default();
        assert_eq!(decoded.deserialize(&buf).unwrap(), 8);
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_bitfield_decodes_exactly_declared_size() {
        let buf = [0xff, 0x80, 0x01, 0x02];
        let mut decoded = BitfieldMessage::with_size(2);
        assert_eq!(decoded.deserialize(&buf).unwrap(), 2);
        assert_eq!(&decoded.bits[..], &[0xff, 0x80]);
    }

    #[test]
    fn test_bitfield_short_input_is_truncated() {
        let mut decoded = BitfieldMessage::with_size(3);
        assert_eq!(
            decoded.deserialize(&[0xff]),
            Err(WireError::Truncated {
                message: "bitfield",
                needed: 3,
                available: 1,
            })
        );
    }

    #[test]
    fn test_extension_consumes_packet_length() {
        let message = ExtensionMessage::new(3, Bytes::from_static(b"ut_metadata"));
        let buf = encode(&message);

        let mut decoded = ExtensionMessage::with_packet_length(buf.len());
        assert_eq!(decoded.deserialize(&buf).unwrap(), 12);
        assert_eq!(decoded.id, 3);
        assert_eq!(&decoded.payload[..], b"ut_metadata");
    }

    #[test]
    fn test_extension_zero_packet_length_is_rejected() {
        let mut decoded = ExtensionMessage::with_packet_length(0);
        assert!(matches!(
            decoded.deserialize(&[1, 2, 3]),
            Err(WireError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_port_uses_two_bytes_both_ways() {
        let buf = encode(&PortMessage { port: 6881 });
        assert_eq!(&buf[..], &[0x1a, 0xe1]);

        let mut decoded = PortMessage::default();
        assert_eq!(decoded.deserialize(&buf).unwrap(), 2);
        assert_eq!(decoded.port, 6881);
    }

    #[test]
    fn test_type_header_rejects_unknown_id() {
        let mut header = TypeHeader::default();
        assert_eq!(
            header.deserialize(&[42]),
            Err(WireError::UnknownMessageType { id: 42 })
        );
    }

    #[test]
    fn test_have_short_input_is_truncated() {
        let mut have = HaveMessage::default();
        assert!(matches!(
            have.deserialize(&[0, 0, 1]),
            Err(WireError::Truncated { needed: 4, .. })
        ));
    }
}
