//! Per-connection byte buffers.
//!
//! Each connection owns two of these: `incoming` accumulates bytes read off
//! the socket until the codec can extract a complete frame, and `outgoing`
//! queues encoded responses until the socket accepts them. Both follow the
//! same contract: append at the tail, consume from the front.

use bytes::{Buf, BytesMut};

/// Append-at-tail, consume-from-front byte accumulator.
///
/// Backed by `BytesMut`, so repeated small appends are amortized O(1) per
/// byte and consumed prefixes are reclaimed rather than retained. The buffer
/// itself enforces no upper bound; size limits are the codec's and the event
/// loop's responsibility.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: BytesMut,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
        }
    }

    /// Append data at the tail.
    pub fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Remove the first `n` bytes.
    ///
    /// # Panics
    /// Panics if `n` exceeds the current length.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.data.len(), "consume past end of buffer");
        self.data.advance(n);
    }

    /// Current number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// View of the buffered bytes, front first.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
