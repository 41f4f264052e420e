//! Content access for uploads.
//!
//! Simulated clients never touch real files. [`SyntheticContent`] generates
//! deterministic bytes for any offset, and [`FakeDataStore`] serves them
//! through the [`ContentStore`] interface the client uses.

use bytes::Bytes;

/// Errors raised by content stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Content not loaded: {name}")]
    NotLoaded { name: String },

    #[error("Read of {length} bytes at {offset} exceeds content length {file_length}")]
    OutOfRange {
        offset: u64,
        length: u32,
        file_length: u64,
    },
}

/// Access to the bytes a client uploads.
pub trait ContentStore {
    /// Makes sure content is available before the client starts serving it.
    ///
    /// # Errors
    ///
    /// - `StorageError` - Content cannot be made available
    fn ensure_loaded(&mut self, name: &str, file_length: u64) -> Result<(), StorageError>;

    /// Reads `length` bytes at absolute `offset`.
    ///
    /// # Errors
    ///
    /// - `StorageError::NotLoaded` - `ensure_loaded` was not called
    /// - `StorageError::OutOfRange` - Read extends past the content
    fn read(&self, offset: u64, length: u32) -> Result<Bytes, StorageError>;
}

/// Deterministic pseudo-random content keyed by a seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticContent {
    seed: u64,
}

impl SyntheticContent {
    /// Creates a generator; equal seeds produce equal content.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Content bytes for `[offset, offset + len)`.
    pub fn bytes(&self, offset: u64, len: usize) -> Vec<u8> {
        (offset..offset + len as u64)
            .map(|position| self.byte_at(position))
            .collect()
    }

    fn byte_at(&self, position: u64) -> u8 {
        let mut x = position ^ self.seed.rotate_left(17);
        x = x.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        (x >> 56) as u8
    }
}

/// Content store backed by [`SyntheticContent`].
#[derive(Debug, Clone)]
pub struct FakeDataStore {
    content: SyntheticContent,
    loaded: Option<(String, u64)>,
}

impl FakeDataStore {
    /// Creates an unloaded store serving `content`.
    pub fn new(content: SyntheticContent) -> Self {
        Self {
            content,
            loaded: None,
        }
    }
}

impl ContentStore for FakeDataStore {
    fn ensure_loaded(&mut self, name: &str, file_length: u64) -> Result<(), StorageError> {
        tracing::debug!(name, file_length, "Fake content ready");
        self.loaded = Some((name.to_string(), file_length));
        Ok(())
    }

    fn read(&self, offset: u64, length: u32) -> Result<Bytes, StorageError> {
        let Some((_, file_length)) = &self.loaded else {
            return Err(StorageError::NotLoaded {
                name: "fake content".to_string(),
            });
        };
        if offset + length as u64 > *file_length {
            return Err(StorageError::OutOfRange {
                offset,
                length,
                file_length: *file_length,
            });
        }
        Ok(Bytes::from(self.content.bytes(offset, length as usize)))
    }
}
