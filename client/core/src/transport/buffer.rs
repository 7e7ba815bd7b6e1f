//! Read Buffer
//!
//! Accumulates bytes read from the socket that have not yet been consumed
//! into a complete response. Parsing always looks at the front; once a
//! response is dispatched exactly its span is dropped with [`ReadBuffer::consume`].
//!
//! Consumed bytes are dropped lazily: the cursor moves forward and the
//! backing vector is drained only once the dead prefix dominates.

/// Minimum dead prefix before the backing storage is drained
const MIN_DRAIN: usize = 4096;

/// Growable buffer with an explicit consume cursor
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl ReadBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_DRAIN {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Unconsumed bytes
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.read_pos..]
    }

    /// Unconsumed bytes, mutable so chunked bodies can be flattened in place
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer[self.read_pos..]
    }

    /// Drop `n` bytes from the front
    ///
    /// Consuming more than is available empties the buffer.
    pub fn consume(&mut self, n: usize) {
        self.read_pos = (self.read_pos + n).min(self.buffer.len());
        if self.read_pos == self.buffer.len() {
            self.clear();
        }
    }

    /// Number of unconsumed bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Whether there are no unconsumed bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}
