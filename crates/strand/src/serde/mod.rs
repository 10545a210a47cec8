//! Serialization cursors.
//!
//! A [`Serializer`] appends bytes to a buffer; a [`Deserializer`] consumes a
//! prefix of one. Both carry the pointer-identity state for the operation in
//! flight: the serializer maps raw addresses to the offset at which their
//! target was written, the deserializer maps offsets back to the single
//! allocation made for them. Offsets are relative to the start of the
//! operation, so a serialization appended to a non-empty buffer round-trips
//! through a deserializer handed only the matching suffix.

mod primitives;

use std::any::Any;
use std::collections::HashMap;

/// Append-only serialization cursor.
pub struct Serializer {
    buf: Vec<u8>,
    base: usize,
    pub(crate) regions: HashMap<usize, u64>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::with_buffer(Vec::new())
    }

    /// Starts a serialization that appends to `buf`.
    pub fn with_buffer(buf: Vec<u8>) -> Self {
        let base = buf.len();
        Serializer {
            buf,
            base,
            regions: HashMap::new(),
        }
    }

    /// Offset of the next byte, relative to the start of this operation.
    pub fn position(&self) -> u64 {
        (self.buf.len() - self.base) as u64
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Consuming deserialization cursor over a byte slice.
pub struct Deserializer<'b> {
    buf: &'b [u8],
    pos: usize,
    pub(crate) regions: HashMap<u64, Box<dyn Any>>,
}

impl<'b> Deserializer<'b> {
    pub fn new(buf: &'b [u8]) -> Self {
        Deserializer {
            buf,
            pos: 0,
            regions: HashMap::new(),
        }
    }

    /// Offset of the next byte, relative to the start of this operation.
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Number of bytes consumed so far. Callers chaining several values out
    /// of one buffer use this to find the start of the next one.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'b [u8], crate::error::SerdeError> {
        if self.buf.len() - self.pos < n {
            return Err(crate::error::SerdeError::UnexpectedEof {
                needed: n,
                offset: self.pos,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}
