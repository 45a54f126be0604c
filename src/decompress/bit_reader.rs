//! Bit reader for compressed data streams.
//!
//! Reads bits from a byte stream, MSB first (MAME convention). Reading past
//! the end yields zero bits instead of failing; callers check [`overflow`]
//! once a whole structure has been decoded.
//!
//! [`overflow`]: BitReader::overflow

/// Bit reader that reads from a byte slice.
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Current bit buffer, left aligned
    buffer: u32,
    /// Bits available in buffer
    bits: u32,
    /// Next byte to load (may run past `data.len()`)
    doffset: usize,
}

impl<'a> BitReader<'a> {
    /// Create a new bit reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            buffer: 0,
            bits: 0,
            doffset: 0,
        }
    }

    /// Peek at the next n bits without consuming them.
    #[inline]
    pub fn peek(&mut self, n: u32) -> u32 {
        debug_assert!(n <= 24);
        if n == 0 {
            return 0;
        }
        if n > self.bits {
            while self.bits <= 24 {
                if let Some(&byte) = self.data.get(self.doffset) {
                    self.buffer |= (byte as u32) << (24 - self.bits);
                }
                self.doffset += 1;
                self.bits += 8;
            }
        }
        self.buffer >> (32 - n)
    }

    /// Discard n bits that were previously peeked.
    #[inline]
    pub fn remove(&mut self, n: u32) {
        debug_assert!(n <= self.bits);
        self.buffer = if n >= 32 { 0 } else { self.buffer << n };
        self.bits -= n;
    }

    /// Read n bits and advance the position.
    #[inline]
    pub fn read(&mut self, n: u32) -> u32 {
        let value = self.peek(n);
        self.remove(n);
        value
    }

    /// Byte offset of the next unread whole byte.
    pub fn read_offset(&self) -> usize {
        self.doffset - (self.bits / 8) as usize
    }

    /// Drop any partially consumed byte and return the byte offset reached.
    ///
    /// Trees chained over one stream are byte aligned with this between
    /// imports.
    pub fn flush(&mut self) -> usize {
        while self.bits >= 8 {
            self.doffset -= 1;
            self.bits -= 8;
        }
        self.bits = 0;
        self.buffer = 0;
        self.doffset
    }

    /// Whether more bytes were consumed than the input holds.
    pub fn overflow(&self) -> bool {
        self.read_offset() > self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bits() {
        let data = [0b10110100, 0b11001010];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.read(4), 0b1011);
        assert_eq!(reader.read(4), 0b0100);
        assert_eq!(reader.read(8), 0b11001010);
        assert!(!reader.overflow());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let data = [0b10110100];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.peek(4), 0b1011);
        assert_eq!(reader.peek(8), 0b10110100);
        assert_eq!(reader.read(3), 0b101);
    }

    #[test]
    fn test_zero_fill_and_overflow() {
        let data = [0xFF];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.read(8), 0xFF);
        assert!(!reader.overflow());
        assert_eq!(reader.read(8), 0);
        assert!(reader.overflow());
    }

    #[test]
    fn test_flush_rounds_down_to_consumed_byte() {
        let data = [0xAB, 0xCD, 0xEF, 0x01, 0x23];
        let mut reader = BitReader::new(&data);

        reader.read(3);
        assert_eq!(reader.flush(), 1);
        assert_eq!(reader.read(8), 0xCD);
        reader.read(8);
        assert_eq!(reader.flush(), 3);
        assert_eq!(reader.read(8), 0x01);
    }
}
