//! Core types and enumerations for the push-pull wire protocol

use bytes::Bytes;

use super::{PieceIndex, WireError};

/// Message type byte following the length prefix.
///
/// Closed enumeration; any other byte is rejected by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum MessageType {
    #[default]
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
    Extension = 20,
}

impl MessageType {
    /// Returns the byte written on the wire.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(MessageType::Choke),
            1 => Ok(MessageType::Unchoke),
            2 => Ok(MessageType::Interested),
            3 => Ok(MessageType::NotInterested),
            4 => Ok(MessageType::Have),
            5 => Ok(MessageType::Bitfield),
            6 => Ok(MessageType::Request),
            7 => Ok(MessageType::Piece),
            8 => Ok(MessageType::Cancel),
            9 => Ok(MessageType::Port),
            20 => Ok(MessageType::Extension),
            _ => Err(WireError::UnknownMessageType { id }),
        }
    }
}

/// A block within a piece: the unit that is requested and transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockRequest {
    /// Piece the block belongs to
    pub piece: PieceIndex,
    /// Byte offset within the piece
    pub offset: u32,
    /// Block length in bytes
    pub length: u32,
}

impl BlockRequest {
    /// Creates a block address.
    pub fn new(piece: PieceIndex, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }
}

/// Framed peer wire messages.
///
/// Everything exchanged after the handshake. Each variant maps to one
/// [`MessageType`] except `KeepAlive`, which is an empty frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Zero-length frame keeping the connection open
    KeepAlive,
    /// Sender will not serve requests
    Choke,
    /// Sender will serve requests
    Unchoke,
    /// Sender wants pieces the receiver has
    Interested,
    /// Sender no longer wants anything from the receiver
    NotInterested,
    /// Sender completed a piece
    Have { piece: PieceIndex },
    /// Sender's complete ownership bitmap
    Bitfield { bitfield: Bytes },
    /// Ask for a block
    Request(BlockRequest),
    /// Block payload
    Piece {
        piece: PieceIndex,
        offset: u32,
        data: Bytes,
    },
    /// Withdraw an earlier request
    Cancel(BlockRequest),
    /// Sender's listen port
    Port { port: u16 },
    /// Extension protocol message keyed by sub-message id
    Extension { id: u8, payload: Bytes },
}

impl PeerMessage {
    /// Returns the type byte for framed messages, `None` for keep-alive.
    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            PeerMessage::KeepAlive => None,
            PeerMessage::Choke => Some(MessageType::Choke),
            PeerMessage::Unchoke => Some(MessageType::Unchoke),
            PeerMessage::Interested => Some(MessageType::Interested),
            PeerMessage::NotInterested => Some(MessageType::NotInterested),
            PeerMessage::Have { .. } => Some(MessageType::Have),
            PeerMessage::Bitfield { .. } => Some(MessageType::Bitfield),
            PeerMessage::Request(_) => Some(MessageType::Request),
            PeerMessage::Piece { .. } => Some(MessageType::Piece),
            PeerMessage::Cancel(_) => Some(MessageType::Cancel),
            PeerMessage::Port { .. } => Some(MessageType::Port),
            PeerMessage::Extension { .. } => Some(MessageType::Extension),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrips_through_byte() {
        for id in [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 20] {
            let kind = MessageType::try_from(id).unwrap();
            assert_eq!(kind.as_u8(), id);
        }
    }

    #[test]
    fn test_message_type_rejects_unassigned_byte() {
        assert_eq!(
            MessageType::try_from(10),
            Err(WireError::UnknownMessageType { id: 10 })
        );
    }

    #[test]
    fn test_keep_alive_has_no_type() {
        assert_eq!(PeerMessage::KeepAlive.message_type(), None);
        assert_eq!(
            PeerMessage::Port { port: 6881 }.message_type(),
            Some(MessageType::Port)
        );
    }
}
