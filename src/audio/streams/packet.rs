/// Fixed-capacity byte buffer with a write end and a read cursor
///
/// The producer pushes bytes until the packet is full; once queued, the
/// consumer reads it frame by frame through the cursor.
#[derive(Debug)]
pub struct Packet {
    data: Vec<u8>,
    used: usize,
    cursor: usize,
}

impl Packet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            used: 0,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn free(&self) -> usize {
        self.data.len() - self.used
    }

    pub fn is_full(&self) -> bool {
        self.used == self.data.len()
    }

    /// Copy as much of `bytes` as fits, returning the count copied
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.free());
        self.data[self.used..self.used + count].copy_from_slice(&bytes[..count]);
        self.used += count;
        count
    }

    /// Next `len` bytes at the cursor, or `None` if fewer remain
    pub fn read(&mut self, len: usize) -> Option<&[u8]> {
        if self.used - self.cursor < len {
            return None;
        }
        let start = self.cursor;
        self.cursor += len;
        Some(&self.data[start..self.cursor])
    }

    pub fn remaining(&self) -> usize {
        self.used - self.cursor
    }

    /// Cursor reached the end of the written data
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.used
    }

    /// Discard unread data without releasing the buffer
    pub fn seek_end(&mut self) {
        self.cursor = self.used;
    }

    /// Empty the packet for reuse
    pub fn clear(&mut self) {
        self.used = 0;
        self.cursor = 0;
    }
}
