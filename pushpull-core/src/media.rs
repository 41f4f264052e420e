//! Shared media metadata.
//!
//! Everything the engine needs to know about the distributed content: piece
//! geometry, per-piece hashes and the info hash. Metadata is parsed from a
//! single-file bencoded torrent, or synthesized from simulated content.

use std::collections::HashMap;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::protocol::{InfoHash, PieceIndex};
use crate::storage::SyntheticContent;

type BencodeDict<'a> = HashMap<&'a [u8], bencode_rs::Value<'a>>;

/// Errors raised while loading media metadata.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Invalid media metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    fn invalid(reason: impl Into<String>) -> Self {
        MediaError::InvalidMetadata {
            reason: reason.into(),
        }
    }
}

/// Read-only description of the shared content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaData {
    name: String,
    file_length: u64,
    piece_length: u32,
    piece_count: u32,
    trailing_piece_length: u32,
    piece_hashes: Vec<[u8; 20]>,
    info_hash: InfoHash,
}

impl MediaData {
    /// Parses a single-file bencoded torrent.
    ///
    /// # Errors
    ///
    /// - `MediaError::InvalidMetadata` - Bencode is malformed, a mandatory key is missing, or the hash list does not match the piece count
    pub fn from_torrent_bytes(torrent_bytes: &[u8]) -> Result<Self, MediaError> {
        let parsed = bencode_rs::Value::parse(torrent_bytes)
            .map_err(|e| MediaError::invalid(format!("Bencode parsing failed: {e:?}")))?;
        let Some(bencode_rs::Value::Dictionary(root)) = parsed.first() else {
            return Err(MediaError::invalid("Root element must be dictionary"));
        };
        let Some(bencode_rs::Value::Dictionary(info)) = root.get(b"info".as_slice()) else {
            return Err(MediaError::invalid("Missing or invalid 'info' dictionary"));
        };

        let name = String::from_utf8(Self::bytes_field(info, b"name")?.to_vec())
            .map_err(|_| MediaError::invalid("Invalid UTF-8 in 'name'"))?;
        let piece_length = Self::positive_field(info, b"piece length")?;
        let file_length = Self::positive_field(info, b"length")?;
        let piece_length = u32::try_from(piece_length)
            .map_err(|_| MediaError::invalid("'piece length' exceeds 32 bits"))?;

        let piece_count = u32::try_from(file_length.div_ceil(piece_length as u64))
            .map_err(|_| MediaError::invalid("Too many pieces"))?;
        let pieces = Self::bytes_field(info, b"pieces")?;
        if pieces.len() != piece_count as usize * 20 {
            return Err(MediaError::invalid(format!(
                "Hash list is {} bytes, expected {} for {piece_count} pieces",
                pieces.len(),
                piece_count as usize * 20
            )));
        }
        let piece_hashes = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let info_hash = InfoHash::new(sha1_digest(info_dictionary_span(torrent_bytes)?));

        Ok(Self {
            name,
            file_length,
            piece_length,
            piece_count,
            trailing_piece_length: (file_length % piece_length as u64) as u32,
            piece_hashes,
            info_hash,
        })
    }

    /// Reads and parses a torrent file from disk.
    ///
    /// # Errors
    ///
    /// - `MediaError::Io` - File could not be read
    /// - `MediaError::InvalidMetadata` - Contents are not valid metadata
    pub fn from_file(path: &Path) -> Result<Self, MediaError> {
        let bytes = std::fs::read(path)?;
        Self::from_torrent_bytes(&bytes)
    }

    /// Builds metadata describing simulated content.
    ///
    /// The torrent is encoded and parsed back so synthesized and loaded
    /// metadata share one code path and one info hash derivation.
    ///
    /// # Errors
    ///
    /// - `MediaError::InvalidMetadata` - Zero file or piece length
    pub fn synthesize(
        name: &str,
        file_length: u64,
        piece_length: u32,
        content: &SyntheticContent,
    ) -> Result<Self, MediaError> {
        if piece_length == 0 || file_length == 0 {
            return Err(MediaError::invalid("File and piece length must be positive"));
        }
        let mut pieces = Vec::new();
        let mut offset = 0u64;
        while offset < file_length {
            let len = (file_length - offset).min(piece_length as u64) as usize;
            pieces.extend_from_slice(&sha1_digest(&content.bytes(offset, len)));
            offset += len as u64;
        }
        Self::from_torrent_bytes(&encode_single_file_torrent(
            name,
            file_length,
            piece_length,
            &pieces,
        ))
    }

    fn bytes_field<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> Result<&'a [u8], MediaError> {
        match dict.get(key) {
            Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
            _ => Err(MediaError::invalid(format!(
                "Missing or invalid field: {}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    fn positive_field(dict: &BencodeDict<'_>, key: &[u8]) -> Result<u64, MediaError> {
        match dict.get(key) {
            Some(bencode_rs::Value::Integer(value)) if *value > 0 => Ok(*value as u64),
            _ => Err(MediaError::invalid(format!(
                "Missing or non-positive field: {}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    /// Content name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total content length in bytes.
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Nominal piece length.
    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// Number of pieces, including a trailing partial one.
    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Length of the final partial piece, 0 when the last piece is full.
    pub fn trailing_piece_length(&self) -> u32 {
        self.trailing_piece_length
    }

    /// Whether the last piece is shorter than the nominal piece length.
    pub fn has_trailing_piece(&self) -> bool {
        self.trailing_piece_length > 0
    }

    /// Byte size of a bitfield covering every piece.
    pub fn bitfield_size(&self) -> usize {
        self.piece_count.div_ceil(8) as usize
    }

    /// Length of a specific piece.
    pub fn piece_len(&self, piece: PieceIndex) -> u32 {
        if self.has_trailing_piece() && piece.as_u32() + 1 == self.piece_count {
            self.trailing_piece_length
        } else {
            self.piece_length
        }
    }

    /// Absolute byte offset where a piece starts.
    pub fn piece_offset(&self, piece: PieceIndex) -> u64 {
        piece.as_u32() as u64 * self.piece_length as u64
    }

    /// Expected SHA-1 of a piece.
    pub fn piece_hash(&self, piece: PieceIndex) -> Option<&[u8; 20]> {
        self.piece_hashes.get(piece.as_usize())
    }

    /// Info hash identifying the content.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Info hash as lowercase hex.
    pub fn info_hash_hex(&self) -> String {
        self.info_hash.to_hex()
    }

    /// Info hash percent-encoded for tracker URLs.
    pub fn info_hash_url_encoded(&self) -> String {
        self.info_hash.to_url_encoded()
    }
}

pub(crate) fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

fn encode_single_file_torrent(
    name: &str,
    file_length: u64,
    piece_length: u32,
    pieces: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"d8:announce13:sim://tracker4:infod");
    out.extend_from_slice(format!("6:lengthi{file_length}e").as_bytes());
    out.extend_from_slice(format!("4:name{}:{name}", name.len()).as_bytes());
    out.extend_from_slice(format!("12:piece lengthi{piece_length}e").as_bytes());
    out.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
    out.extend_from_slice(pieces);
    out.extend_from_slice(b"ee");
    out
}

/// Locates the raw bytes of the top-level `info` dictionary.
fn info_dictionary_span(data: &[u8]) -> Result<&[u8], MediaError> {
    let start = data
        .windows(6)
        .position(|window| window == b"4:info")
        .map(|pos| pos + 6)
        .ok_or_else(|| MediaError::invalid("Could not find info dictionary"))?;
    let rest = &data[start..];
    if rest.first() != Some(&b'd') {
        return Err(MediaError::invalid("Info field must be dictionary"));
    }

    let mut pos = 1;
    let mut depth = 1;
    while depth > 0 {
        match rest.get(pos) {
            Some(b'd' | b'l') => {
                depth += 1;
                pos += 1;
            }
            Some(b'e') => {
                depth -= 1;
                pos += 1;
            }
            Some(b'i') => {
                let end = rest[pos..]
                    .iter()
                    .position(|byte| *byte == b'e')
                    .ok_or_else(|| MediaError::invalid("Unterminated integer"))?;
                pos += end + 1;
            }
            Some(b'0'..=b'9') => {
                let colon = rest[pos..]
                    .iter()
                    .position(|byte| *byte == b':')
                    .ok_or_else(|| MediaError::invalid("Invalid string format"))?;
                let len: usize = std::str::from_utf8(&rest[pos..pos + colon])
                    .ok()
                    .and_then(|text| text.parse().ok())
                    .ok_or_else(|| MediaError::invalid("Invalid string length"))?;
                pos += colon + 1 + len;
            }
            _ => return Err(MediaError::invalid("Incomplete info dictionary")),
        }
    }
    rest.get(..pos)
        .ok_or_else(|| MediaError::invalid("Incomplete info dictionary"))
}
