//! Push-pull wire protocol: identifiers, message codecs and framing.

pub mod codec;
pub mod handshake;
pub mod messages;
pub mod types;

use std::fmt;

pub use codec::MessageCodec;
pub use handshake::Handshake;
pub use messages::{
    BitfieldMessage, BlockMessage, ExtensionMessage, HaveMessage, LengthHeader, PieceHeader,
    PortMessage, TypeHeader, WireMessage,
};
pub use types::{BlockRequest, MessageType, PeerMessage};

/// SHA-1 info hash identifying the shared content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex form used in logs and tracker keys.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Percent-encoded form used in tracker announce URLs.
    pub fn to_url_encoded(&self) -> String {
        urlencoding::encode_binary(&self.0).into_owned()
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 20-byte peer identifier exchanged in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Builds a peer id from text, truncating or padding with `.` to 20 bytes.
    pub fn from_text(text: &str) -> Self {
        let mut id = [b'.'; 20];
        let bytes = text.as_bytes();
        let len = bytes.len().min(20);
        id[..len].copy_from_slice(&bytes[..len]);
        Self(id)
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Zero-based index of a piece within the shared content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the index for slice addressing.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("Truncated {message}: need {needed} bytes, have {available}")]
    Truncated {
        message: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Length mismatch for {message}: declared {declared}, expected {expected}")]
    LengthMismatch {
        message: &'static str,
        declared: usize,
        expected: usize,
    },

    #[error("Frame too large: declared {declared} bytes, limit {limit}")]
    FrameTooLarge { declared: usize, limit: usize },

    #[error("Unknown message type: {id}")]
    UnknownMessageType { id: u8 },

    #[error("Protocol name too long: {len} bytes (max 255)")]
    ProtocolNameTooLong { len: usize },

    #[error("Info hash mismatch: expected {expected}, received {received}")]
    InfoHashMismatch {
        expected: InfoHash,
        received: InfoHash,
    },
}

impl WireError {
    pub(crate) fn ensure_available(
        message: &'static str,
        buf: &[u8],
        needed: usize,
    ) -> Result<(), WireError> {
        if buf.len() < needed {
            return Err(WireError::Truncated {
                message,
                needed,
                available: buf.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_display_is_hex() {
        let mut hash = [0u8; 20];
        hash[0] = 0xab;
        hash[19] = 0x01;
        let info_hash = InfoHash::new(hash);
        assert_eq!(
            info_hash.to_string(),
            "ab00000000000000000000000000000000000001"
        );
    }

    #[test]
    fn test_info_hash_url_encoding_escapes_binary() {
        let mut hash = [b'a'; 20];
        hash[0] = 0x00;
        hash[1] = 0xff;
        let encoded = InfoHash::new(hash).to_url_encoded();
        assert!(encoded.starts_with("%00%FF"));
        assert!(encoded.ends_with("aaaa"));
    }

    #[test]
    fn test_peer_id_from_text_pads_with_dots() {
        let peer_id = PeerId::from_text("VODSim-3-42");
        assert_eq!(peer_id.to_string(), "VODSim-3-42.........");
    }

    #[test]
    fn test_peer_id_from_text_truncates_long_input() {
        let peer_id = PeerId::from_text("VODSim-12345-4294967294");
        assert_eq!(peer_id.as_bytes().len(), 20);
        assert_eq!(peer_id.to_string(), "VODSim-12345-4294967");
    }

    #[test]
    fn test_piece_index_ordering() {
        let piece1 = PieceIndex::new(5);
        let piece2 = PieceIndex::new(10);
        assert!(piece1 < piece2);
        assert_eq!(piece1.as_u32(), 5);
    }
}
