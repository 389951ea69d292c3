//! Part building for multipart exports
//!
//! The [`PartBuilder`] turns the stream of serialized lines into numbered,
//! size-capped [`Part`] payloads. Lines are never split: a part is sealed
//! before a line that would push it over the cap, and that line starts the
//! next part.
//!
//! A single line larger than the cap becomes its own oversized part. The
//! object is exported as-is rather than truncating or rejecting the record.

use bytes::{Bytes, BytesMut};

/// Default part size cap (1 MiB)
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 1024 * 1024;

/// Upload state of a part within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    /// Sealed and waiting for a worker slot
    Pending,
    /// Handed to the backend
    Uploading,
    /// Stored by the backend, tag recorded
    Uploaded,
    /// Upload failed; the session must be aborted
    Failed,
}

/// One numbered payload destined for a multipart-upload slot
#[derive(Debug, Clone)]
pub struct Part {
    part_number: i32,
    payload: Bytes,
}

impl Part {
    pub fn new(part_number: i32, payload: Bytes) -> Self {
        Self {
            part_number,
            payload,
        }
    }

    pub fn part_number(&self) -> i32 {
        self.part_number
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Accumulates serialized lines into size-capped parts
///
/// Owned exclusively by the coordinator; part numbers start at 1 and are
/// assigned in sealing order without gaps.
#[derive(Debug)]
pub struct PartBuilder {
    chunk_size: usize,
    buffer: BytesMut,
    next_part_number: i32,
}

impl PartBuilder {
    /// Create a builder sealing parts at `chunk_size` bytes
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size),
            next_part_number: 1,
        }
    }

    /// Append one complete line
    ///
    /// # Returns
    /// * `Option<Part>` - The part sealed to make room for this line, if any
    pub fn push_line(&mut self, line: &[u8]) -> Option<Part> {
        let sealed = if !self.buffer.is_empty() && self.buffer.len() + line.len() > self.chunk_size
        {
            Some(self.seal())
        } else {
            None
        };

        self.buffer.extend_from_slice(line);
        sealed
    }

    /// Seal the remaining buffer as the final part
    ///
    /// Returns `None` when nothing is buffered, so an empty part is never produced.
    pub fn finish(&mut self) -> Option<Part> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.seal())
        }
    }

    /// Number of parts sealed so far
    pub fn parts_sealed(&self) -> i32 {
        self.next_part_number - 1
    }

    /// Bytes currently buffered for the next part
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn seal(&mut self) -> Part {
        let payload = self.buffer.split().freeze();
        self.buffer.reserve(self.chunk_size);

        let part = Part::new(self.next_part_number, payload);
        self.next_part_number += 1;
        part
    }
}

impl Default for PartBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE_BYTES)
    }
}
