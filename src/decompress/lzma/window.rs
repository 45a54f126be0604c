//! Linear output window for LZMA.
//!
//! The dictionary is the block itself: matches copy from bytes already
//! written to the destination buffer, so no separate ring is needed.

use super::super::{DecompressError, Result};

/// Output window over the destination buffer.
pub struct OutWindow<'a> {
    buf: &'a mut [u8],
    /// Current write position
    pos: usize,
}

impl<'a> OutWindow<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Write a literal byte to the output.
    #[inline]
    pub fn put_byte(&mut self, byte: u8) {
        self.buf[self.pos] = byte;
        self.pos += 1;
    }

    /// Byte `distance` positions back (1 = last written).
    #[inline]
    pub fn get_byte(&self, distance: usize) -> u8 {
        self.buf[self.pos - distance]
    }

    /// Copy `length` bytes from `distance` bytes back.
    ///
    /// Overlapping copies repeat the pattern, as LZ77 requires.
    #[inline]
    pub fn copy_match(&mut self, distance: usize, length: usize) -> Result<()> {
        if distance == 0 || distance > self.pos {
            return Err(DecompressError::InvalidBackReference {
                distance: distance as u32,
                position: self.pos,
            });
        }
        if length > self.remaining() {
            return Err(DecompressError::PendingCopy {
                pending: length - self.remaining(),
            });
        }

        let src = self.pos - distance;
        if distance >= length {
            self.buf.copy_within(src..src + length, self.pos);
        } else {
            for i in 0..length {
                self.buf[self.pos + i] = self.buf[src + i];
            }
        }
        self.pos += length;
        Ok(())
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.pos == self.buf.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_output() {
        let mut buf = [0u8; 5];
        let mut window = OutWindow::new(&mut buf);
        for &b in b"Hello" {
            window.put_byte(b);
        }
        assert!(window.is_full());
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn test_overlapping_copy() {
        let mut buf = [0u8; 9];
        let mut window = OutWindow::new(&mut buf);
        window.put_byte(b'a');
        window.put_byte(b'b');
        window.put_byte(b'c');
        window.copy_match(3, 6).unwrap();
        assert_eq!(&buf, b"abcabcabc");
    }

    #[test]
    fn test_distance_beyond_history() {
        let mut buf = [0u8; 8];
        let mut window = OutWindow::new(&mut buf);
        window.put_byte(b'x');
        assert!(matches!(
            window.copy_match(2, 1),
            Err(DecompressError::InvalidBackReference { distance: 2, position: 1 })
        ));
    }

    #[test]
    fn test_copy_past_end_is_pending() {
        let mut buf = [0u8; 4];
        let mut window = OutWindow::new(&mut buf);
        window.put_byte(b'x');
        assert!(matches!(
            window.copy_match(1, 5),
            Err(DecompressError::PendingCopy { pending: 2 })
        ));
    }
}
