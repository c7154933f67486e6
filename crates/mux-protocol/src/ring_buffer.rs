//! Fixed-capacity ring buffer used for per-session terminal scrollback.
//!
//! Write is O(1) amortized and silently discards the oldest bytes once the
//! buffer is full, matching what a late-attaching viewer expects: the most
//! recent `capacity` bytes of terminal output, nothing more.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RingBufferError {
    #[error("ring buffer capacity must be positive, got {0}")]
    NonPositiveCapacity(i64),
}

/// A circular byte buffer with overflow-discard semantics.
///
/// `head` is the index the next write begins at; `tail` is the index of the
/// oldest retained byte; `count` is the number of valid bytes currently
/// stored. All three are taken modulo `capacity`.
pub struct CircularByteBuffer {
    storage: Vec<u8>,
    capacity: usize,
    head: usize,
    tail: usize,
    count: usize,
}

impl CircularByteBuffer {
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::NonPositiveCapacity(0));
        }
        Ok(Self {
            storage: vec![0u8; capacity],
            capacity,
            head: 0,
            tail: 0,
            count: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    /// Append `bytes` to the buffer, discarding the oldest bytes on overflow.
    pub fn write(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        if len == 0 {
            return;
        }

        if len >= self.capacity {
            // The new write alone fills or exceeds capacity: keep only its tail.
            let start = len - self.capacity;
            self.storage.copy_from_slice(&bytes[start..]);
            self.head = 0;
            self.tail = 0;
            self.count = self.capacity;
            return;
        }

        let overflow = (self.count + len).saturating_sub(self.capacity);
        if overflow > 0 {
            self.tail = (self.tail + overflow) % self.capacity;
        }

        // Write in up to two segments, wrapping at the end of storage.
        let first_len = (self.capacity - self.head).min(len);
        self.storage[self.head..self.head + first_len].copy_from_slice(&bytes[..first_len]);
        if first_len < len {
            let remaining = len - first_len;
            self.storage[..remaining].copy_from_slice(&bytes[first_len..]);
        }

        self.head = (self.head + len) % self.capacity;
        self.count = (self.count + len).min(self.capacity);
    }

    /// Copy out the buffered bytes in logical (oldest-to-newest) order.
    pub fn snapshot(&self) -> Vec<u8> {
        if self.count == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.count);
        if self.tail < self.head {
            out.extend_from_slice(&self.storage[self.tail..self.head]);
        } else {
            out.extend_from_slice(&self.storage[self.tail..self.capacity]);
            out.extend_from_slice(&self.storage[..self.head]);
        }
        out
    }
}
