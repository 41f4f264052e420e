//! Handshake serialization and deserialization
//!
//! The handshake is the only message that is not length/type framed:
//! `pstrlen | pstr | 5 reserved | flags | 2 reserved | info hash | peer id`.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use super::messages::WireMessage;
use super::{InfoHash, PeerId, WireError};

/// Protocol name sent by default.
pub const DEFAULT_PROTOCOL_NAME: &str = "BitTorrent protocol";

/// Flag bit advertising support for extension messages.
pub const EXTENSION_PROTOCOL_FLAG: u8 = 0x10;

/// Fixed handshake bytes besides the protocol name.
const FIXED_LEN: usize = 1 + 8 + 20 + 20;

/// Connection handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol identifier, at most 255 bytes
    protocol: Bytes,
    /// Whether the sender understands extension messages
    pub supports_extensions: bool,
    /// Content both sides must agree on
    pub info_hash: InfoHash,
    /// Sender identity
    pub peer_id: PeerId,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            protocol: Bytes::from_static(DEFAULT_PROTOCOL_NAME.as_bytes()),
            supports_extensions: false,
            info_hash: InfoHash::default(),
            peer_id: PeerId::default(),
        }
    }
}

impl Handshake {
    /// Creates a handshake with the default protocol name.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            info_hash,
            peer_id,
            ..Self::default()
        }
    }

    /// Creates a handshake with a custom protocol name.
    ///
    /// # Errors
    ///
    /// - `WireError::ProtocolNameTooLong` - Name does not fit the 1-byte length field
    pub fn with_protocol(
        protocol: impl Into<Bytes>,
        info_hash: InfoHash,
        peer_id: PeerId,
    ) -> Result<Self, WireError> {
        let protocol = protocol.into();
        if protocol.len() > u8::MAX as usize {
            return Err(WireError::ProtocolNameTooLong {
                len: protocol.len(),
            });
        }
        Ok(Self {
            protocol,
            supports_extensions: false,
            info_hash,
            peer_id,
        })
    }

    /// Marks the handshake as advertising extension support.
    pub fn with_extensions(mut self) -> Self {
        self.supports_extensions = true;
        self
    }

    /// Raw protocol identifier as sent on the wire.
    pub fn protocol(&self) -> &[u8] {
        &self.protocol
    }

    /// Protocol identifier as text, with invalid UTF-8 replaced.
    pub fn protocol_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.protocol)
    }

    /// Returns the full handshake length if `buf` starts with a complete one.
    pub fn complete_len(buf: &[u8]) -> Option<usize> {
        let protocol_len = *buf.first()? as usize;
        let total = protocol_len + FIXED_LEN;
        (buf.len() >= total).then_some(total)
    }
}

impl WireMessage for Handshake {
    fn serialized_len(&self) -> usize {
        self.protocol.len() + FIXED_LEN
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u8(self.protocol.len() as u8);
        buf.extend_from_slice(&self.protocol);
        buf.put_bytes(0, 5);
        buf.put_u8(if self.supports_extensions {
            EXTENSION_PROTOCOL_FLAG
        } else {
            0
        });
        buf.put_bytes(0, 2);
        buf.extend_from_slice(self.info_hash.as_bytes());
        buf.extend_from_slice(self.peer_id.as_bytes());
    }

    fn deserialize(&mut self, buf: &[u8]) -> Result<usize, WireError> {
        WireError::ensure_available("handshake", buf, 1)?;
        let protocol_len = buf[0] as usize;
        let total = protocol_len + FIXED_LEN;
        WireError::ensure_available("handshake", buf, total)?;

        let mut pos = 1;
        self.protocol = Bytes::copy_from_slice(&buf[pos..pos + protocol_len]);
        pos += protocol_len;

        self.supports_extensions = buf[pos + 5] & EXTENSION_PROTOCOL_FLAG != 0;
        pos += 8;

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[pos..pos + 20]);
        self.info_hash = InfoHash::new(info_hash);
        pos += 20;

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[pos..pos + 20]);
        self.peer_id = PeerId::new(peer_id);

        Ok(total)
    }
}
