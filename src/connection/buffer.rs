//! Connection I/O Buffers
//!
//! Each connection owns one inbound and one outbound buffer while a request
//! is in flight. Both have a fixed capacity chosen at construction; neither
//! ever grows, so a single request must fit in the read buffer and a single
//! response in the send buffer.
//!
//! ```text
//! ReadBuffer:  [ valid bytes ........ | spare capacity        ]
//!              0                     len                    cap
//!
//! SendBuffer:  [ already sent | pending ........ | free      ]
//!              0             sent              len         cap
//! ```

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Default read buffer capacity (16 KB)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Default send buffer capacity (64 KB)
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 64 * 1024;

/// Errors from buffer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The bytes do not fit in the remaining capacity
    #[error("send buffer overflow: {needed} bytes needed, {available} available")]
    Overflow { needed: usize, available: usize },
}

/// Fixed-capacity inbound buffer with a fill cursor.
#[derive(Debug)]
pub struct ReadBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl ReadBuffer {
    /// Allocates a zeroed buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid (received, not yet consumed) bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when no spare capacity is left for another read.
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The region a socket read may fill.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Marks `n` more bytes of the spare region as valid.
    pub fn fill(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.data.len());
        self.len = (self.len + n).min(self.data.len());
    }

    /// Drops the first `n` valid bytes and shifts the rest to the front.
    ///
    /// Bytes after `n` survive for the next parse attempt.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Discards every valid byte.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Appends `bytes`, returning how many fit.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.data.len() - self.len);
        self.spare_mut()[..n].copy_from_slice(&bytes[..n]);
        self.len += n;
        n
    }
}

/// Fixed-capacity outbound buffer with an already-sent cursor.
#[derive(Debug)]
pub struct SendBuffer {
    data: BytesMut,
    capacity: usize,
    sent: usize,
}

impl SendBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            sent: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes produced but not yet written to the socket.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.sent..]
    }

    pub fn pending_len(&self) -> usize {
        self.data.len() - self.sent
    }

    /// Bytes of the current response already written.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// True when nothing is waiting to be flushed.
    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    /// Space left for more response bytes.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Queues `bytes` for sending; all or nothing.
    pub fn put(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.len() > self.remaining() {
            return Err(BufferError::Overflow {
                needed: bytes.len(),
                available: self.remaining(),
            });
        }
        self.data.put_slice(bytes);
        Ok(())
    }

    /// Records that `n` pending bytes reached the socket.
    ///
    /// Once everything is sent the buffer rewinds to empty.
    pub fn advance(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.data.len());
        if self.sent == self.data.len() {
            self.clear();
        }
    }

    /// Drops any queued bytes.
    pub fn clear(&mut self) {
        self.data.clear();
        self.sent = 0;
    }
}

/// The read/send pair. Allocated and released together.
#[derive(Debug)]
pub struct IoBuffers {
    pub read: ReadBuffer,
    pub send: SendBuffer,
}

impl IoBuffers {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            read: ReadBuffer::with_capacity(limits.read),
            send: SendBuffer::with_capacity(limits.send),
        }
    }
}

/// Capacities used when a connection allocates its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    pub read: usize,
    pub send: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            read: DEFAULT_READ_BUFFER_SIZE,
            send: DEFAULT_SEND_BUFFER_SIZE,
        }
    }
}
