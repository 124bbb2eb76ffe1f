//! Owned byte buffers with explicit growth and truncation policies.
//!
//! - [`GrowableBuffer`]: doubling buffer bounded by a maximum capacity
//! - [`ResponseBuffer`]: the answer accumulator, always NUL-terminated
//! - [`LineBuffer`]: fixed-capacity line reassembly, drops overflow bytes

use log::warn;

/// Default maximum stored length of a single SSE line
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

/// Default initial capacity of the response accumulator
pub const DEFAULT_RESPONSE_CAPACITY: usize = 32 * 1024;

/// Default ceiling for the response accumulator
pub const DEFAULT_MAX_RESPONSE_CAPACITY: usize = 4 * 1024 * 1024;

/// Append-only byte buffer whose logical capacity doubles on demand.
///
/// Capacity only ever grows. Growth stops at `max_capacity` or when the
/// allocator refuses, in which case the write is rejected and the existing
/// contents are left untouched.
#[derive(Debug, Clone)]
pub struct GrowableBuffer {
    data: Vec<u8>,
    capacity: usize,
    max_capacity: usize,
}

impl GrowableBuffer {
    /// Create a buffer with the given initial and maximum capacity.
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            max_capacity: max_capacity.max(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current logical capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Double the capacity until it is at least `required`.
    ///
    /// Returns false if that would exceed the ceiling or the allocation fails.
    pub fn ensure_capacity(&mut self, required: usize) -> bool {
        let mut new_capacity = self.capacity;
        while new_capacity < required {
            new_capacity = match new_capacity.checked_mul(2) {
                Some(c) if c <= self.max_capacity => c,
                _ => return false,
            };
        }

        if new_capacity != self.capacity {
            let additional = new_capacity - self.data.len();
            if self.data.try_reserve_exact(additional).is_err() {
                return false;
            }
            self.capacity = new_capacity;
        }
        true
    }

    /// Append bytes, growing first. Returns false (and writes nothing) if the
    /// buffer cannot grow enough.
    pub fn extend(&mut self, bytes: &[u8]) -> bool {
        let Some(required) = self.data.len().checked_add(bytes.len()) else {
            return false;
        };
        if !self.ensure_capacity(required) {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Accumulated answer text.
///
/// The backing storage always ends in a single NUL byte directly after the
/// content, so `capacity >= len + 1` holds at all times.
#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    inner: GrowableBuffer,
    dropped_bytes: usize,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_CAPACITY, DEFAULT_MAX_RESPONSE_CAPACITY)
    }
}

impl ResponseBuffer {
    /// Create an empty accumulator (the empty NUL-terminated string).
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Self {
        let mut inner = GrowableBuffer::new(initial_capacity, max_capacity);
        inner.data.push(0);
        Self {
            inner,
            dropped_bytes: 0,
        }
    }

    /// Append `bytes` verbatim.
    ///
    /// If the buffer cannot grow to `len + bytes.len() + 1` the whole append
    /// is dropped and counted in [`ResponseBuffer::dropped_bytes`].
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let len = self.len();
        let required = len.saturating_add(bytes.len()).saturating_add(1);
        if !self.inner.ensure_capacity(required) {
            warn!(
                "Response buffer exhausted at {} bytes, dropping {} bytes",
                len,
                bytes.len()
            );
            self.dropped_bytes += bytes.len();
            return;
        }

        self.inner.data.truncate(len);
        self.inner.data.extend_from_slice(bytes);
        self.inner.data.push(0);
    }

    /// Replace the contents with `bytes`, truncated to `capacity - 1`.
    ///
    /// Used to keep a raw error body instead of decoded text.
    pub fn replace_truncated(&mut self, bytes: &[u8]) {
        let copy_len = bytes.len().min(self.capacity() - 1);
        self.dropped_bytes += bytes.len() - copy_len;
        self.inner.data.clear();
        self.inner.data.extend_from_slice(&bytes[..copy_len]);
        self.inner.data.push(0);
    }

    /// Content length, excluding the terminator
    pub fn len(&self) -> usize {
        self.inner.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Bytes lost to exhaustion or truncation so far
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    /// Content without the terminator
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.as_slice()[..self.len()]
    }

    /// Content including the trailing NUL
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        self.inner.as_slice()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

/// Reassembly buffer for one SSE line.
///
/// Holds at most `max_len` bytes; anything beyond that is dropped until the
/// line terminates.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    data: Vec<u8>,
    max_len: usize,
    truncated: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LEN)
    }
}

impl LineBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            data: Vec::with_capacity(max_len),
            max_len,
            truncated: false,
        }
    }

    /// Push one byte; returns false if it was dropped for lack of room.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.data.len() < self.max_len {
            self.data.push(byte);
            true
        } else {
            self.truncated = true;
            false
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Whether bytes of the current line have been dropped
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Reset to an empty line, keeping the allocation
    pub fn clear(&mut self) {
        self.data.clear();
        self.truncated = false;
    }
}
