/// Default receive buffer capacity. Also bounds how large a request line
/// plus headers can grow before a request is rejected.
pub const DEFAULT_CAPACITY: usize = 16 * 1024;

/// Fixed-capacity receive buffer owned by a single connection.
///
/// Unconsumed bytes are always kept left-aligned at offset 0 between parse
/// attempts, so the next read lands right after them.
pub struct RawBuffer {
    data: Box<[u8]>,
    bytes_left: usize,
}

impl RawBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)].into_boxed_slice(),
            bytes_left: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of received bytes that have not been consumed yet.
    pub fn bytes_left(&self) -> usize {
        self.bytes_left
    }

    pub fn is_full(&self) -> bool {
        self.bytes_left == self.data.len()
    }

    /// The unconsumed region, starting at offset 0.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.bytes_left]
    }

    /// Free space after the unconsumed bytes, where the next read goes.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.bytes_left..]
    }

    /// Records `n` bytes written into [`spare_mut`](Self::spare_mut).
    pub fn advance(&mut self, n: usize) {
        assert!(
            self.bytes_left + n <= self.data.len(),
            "advanced past buffer capacity"
        );
        self.bytes_left += n;
    }

    /// Drops the first `consumed` bytes and moves the rest to offset 0.
    pub fn compact(&mut self, consumed: usize) {
        let consumed = consumed.min(self.bytes_left);
        if consumed == 0 {
            return;
        }
        self.data.copy_within(consumed..self.bytes_left, 0);
        self.bytes_left -= consumed;
    }
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_moves_tail_to_front() {
        let mut buf = RawBuffer::new(8);
        buf.spare_mut()[..6].copy_from_slice(b"abcdef");
        buf.advance(6);

        buf.compact(4);

        assert_eq!(buf.filled(), b"ef");
        assert_eq!(buf.spare_mut().len(), 6);
    }

    #[test]
    fn full_when_nothing_consumed() {
        let mut buf = RawBuffer::new(4);
        buf.spare_mut().copy_from_slice(b"GET ");
        buf.advance(4);

        assert!(buf.is_full());
        buf.compact(0);
        assert!(buf.is_full());
    }
}
