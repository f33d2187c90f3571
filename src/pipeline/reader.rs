//! Cursor over buffered bytes.

/// A forward-only cursor over the bytes a filter may inspect.
///
/// Filters advance the cursor past what they consume; the engine drops
/// exactly [`consumed`](Self::consumed) bytes after each call.
#[derive(Debug)]
pub struct SequenceReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> SequenceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.position
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unconsumed bytes, without moving the cursor.
    pub fn unread(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    /// Move the cursor forward by up to `n` bytes.
    pub fn advance(&mut self, n: usize) {
        self.position = (self.position + n).min(self.data.len());
    }

    /// Move the cursor back by up to `n` bytes.
    pub fn rewind(&mut self, n: usize) {
        self.position = self.position.saturating_sub(n);
    }

    /// Consume and return up to `n` bytes.
    pub fn take(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.remaining());
        let out = &self.data[self.position..self.position + n];
        self.position += n;
        out
    }

    /// Consume exactly `n` bytes, or nothing if fewer are available.
    pub fn try_take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        Some(self.take(n))
    }

    pub fn try_read_u8(&mut self) -> Option<u8> {
        self.try_take(1).map(|b| b[0])
    }

    pub fn try_read_be_u16(&mut self) -> Option<u16> {
        self.try_take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn try_read_be_u32(&mut self) -> Option<u32> {
        self.try_take(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn try_read_be_u64(&mut self) -> Option<u64> {
        self.try_take(8).map(|b| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            u64::from_be_bytes(raw)
        })
    }

    /// Copy exactly `dst.len()` bytes, or nothing if fewer are available.
    pub fn try_copy_to(&mut self, dst: &mut [u8]) -> bool {
        match self.try_take(dst.len()) {
            Some(src) => {
                dst.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    /// Find `delimiter` in the unread bytes, searching from `from` (relative
    /// to the cursor). Returns the offset of the delimiter's first byte.
    pub fn find(&self, delimiter: &[u8], from: usize) -> Option<usize> {
        let unread = self.unread();
        if delimiter.is_empty() || from >= unread.len() {
            return None;
        }
        unread[from..]
            .windows(delimiter.len())
            .position(|w| w == delimiter)
            .map(|pos| pos + from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_advance_cursor() {
        let data = [0x01, 0x00, 0x02, 0xAA];
        let mut reader = SequenceReader::new(&data);
        assert_eq!(reader.try_read_u8(), Some(0x01));
        assert_eq!(reader.try_read_be_u16(), Some(0x0002));
        assert_eq!(reader.consumed(), 3);
        assert_eq!(reader.remaining(), 1);
    }

    #[test]
    fn test_short_read_consumes_nothing() {
        let data = [0x01, 0x02];
        let mut reader = SequenceReader::new(&data);
        assert_eq!(reader.try_read_be_u32(), None);
        assert_eq!(reader.consumed(), 0);

        let mut key = [0u8; 4];
        assert!(!reader.try_copy_to(&mut key));
        assert_eq!(reader.consumed(), 0);
    }

    #[test]
    fn test_find_from_offset() {
        let data = b"ab\r\ncd\r\n";
        let mut reader = SequenceReader::new(data);
        assert_eq!(reader.find(b"\r\n", 0), Some(2));
        assert_eq!(reader.find(b"\r\n", 3), Some(6));
        reader.advance(4);
        assert_eq!(reader.find(b"\r\n", 0), Some(2));
        assert_eq!(reader.find(b"\r\n", 10), None);
    }

    #[test]
    fn test_rewind() {
        let data = [1, 2, 3];
        let mut reader = SequenceReader::new(&data);
        reader.advance(3);
        reader.rewind(2);
        assert_eq!(reader.unread(), &[2, 3]);
    }
}
