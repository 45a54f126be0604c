//! Canonical Huffman decoder in the MAME/CHD flavour.
//!
//! Codes are assigned canonically from lengths alone, with the longest
//! codes receiving the lowest values. Decoding goes through a single
//! `2^max_bits` lookup table, so `max_bits` is kept small (16 at most).
//!
//! Three ways of importing the code lengths are supported:
//!
//! | Method | Used by |
//! |--------|---------|
//! | [`import_lengths`] | tests, callers holding a plain length table |
//! | [`import_tree_rle`] | AVHuff audio and video trees |
//! | [`import_tree_huffman`] | the `huff` block codec |
//!
//! [`import_lengths`]: HuffmanDecoder::import_lengths
//! [`import_tree_rle`]: HuffmanDecoder::import_tree_rle
//! [`import_tree_huffman`]: HuffmanDecoder::import_tree_huffman

use super::{BitReader, DecompressError, Result};

/// Longest code length the lookup table supports.
pub const MAX_CODE_LENGTH: u8 = 16;

/// Symbols in the tree used to transmit other trees' lengths.
const SMALL_TREE_CODES: usize = 24;
const SMALL_TREE_BITS: u8 = 6;

/// Lookup entries pack `(symbol << 5) | length`; zero marks an empty slot.
#[inline]
const fn make_lookup(symbol: u32, bits: u8) -> u32 {
    (symbol << 5) | (bits as u32 & 0x1f)
}

/// Decoder for one canonical Huffman code.
#[derive(Clone)]
pub struct HuffmanDecoder {
    num_codes: usize,
    max_bits: u8,
    /// Code length per symbol
    lengths: Vec<u8>,
    /// Canonical code per symbol
    codes: Vec<u32>,
    lookup: Vec<u32>,
}

impl HuffmanDecoder {
    /// Create a decoder over `num_codes` symbols with codes up to `max_bits`.
    pub fn new(num_codes: usize, max_bits: u8) -> Self {
        debug_assert!(max_bits >= 1 && max_bits <= MAX_CODE_LENGTH);
        Self {
            num_codes,
            max_bits,
            lengths: vec![0; num_codes],
            codes: vec![0; num_codes],
            lookup: vec![0; 1 << max_bits],
        }
    }

    pub fn num_codes(&self) -> usize {
        self.num_codes
    }

    /// Install code lengths verbatim, one per symbol.
    pub fn import_lengths(&mut self, lengths: &[u8]) -> Result<()> {
        if lengths.len() != self.num_codes {
            return Err(DecompressError::InvalidHuffmanTree("wrong number of lengths"));
        }
        self.lengths.copy_from_slice(lengths);
        self.build()
    }

    /// Import lengths stored as fixed-width values with a run escape.
    ///
    /// Each length takes 3, 4 or 5 bits depending on `max_bits`. The value 1
    /// is an escape: `1 1` is a literal length of one, `1 n r` repeats
    /// length `n` for `r + 3` symbols.
    pub fn import_tree_rle(&mut self, reader: &mut BitReader<'_>) -> Result<()> {
        let numbits = if self.max_bits >= 16 {
            5
        } else if self.max_bits >= 8 {
            4
        } else {
            3
        };

        let mut cur = 0;
        while cur < self.num_codes {
            let nodebits = reader.read(numbits) as u8;
            if nodebits != 1 {
                self.lengths[cur] = nodebits;
                cur += 1;
                continue;
            }

            let nodebits = reader.read(numbits) as u8;
            if nodebits == 1 {
                self.lengths[cur] = 1;
                cur += 1;
            } else {
                let repcount = reader.read(numbits) as usize + 3;
                if cur + repcount > self.num_codes {
                    return Err(DecompressError::InvalidHuffmanTree("run overruns alphabet"));
                }
                self.lengths[cur..cur + repcount].fill(nodebits);
                cur += repcount;
            }
        }

        self.build()?;
        if reader.overflow() {
            return Err(DecompressError::Overflow);
        }
        Ok(())
    }

    /// Import lengths coded with a small secondary Huffman tree.
    ///
    /// The small tree covers 24 symbols with 3-bit lengths. Its symbol 0
    /// repeats the previous length `read(3) + 2` times, with an escape to
    /// a wider count when that reaches 9; any other symbol `v` is a
    /// length of `v - 1`.
    pub fn import_tree_huffman(&mut self, reader: &mut BitReader<'_>) -> Result<()> {
        let mut small = Self::new(SMALL_TREE_CODES, SMALL_TREE_BITS);
        small.lengths[0] = reader.read(3) as u8;
        let start = reader.read(3) as usize + 1;
        let mut count = 0;
        for index in 1..SMALL_TREE_CODES {
            if index < start || count == 7 {
                small.lengths[index] = 0;
            } else {
                count = reader.read(3);
                small.lengths[index] = if count == 7 { 0 } else { count as u8 };
            }
        }
        small.build()?;

        // Width of an escaped run count
        let mut temp = self.num_codes.saturating_sub(9);
        let mut rlefullbits = 0;
        while temp != 0 {
            temp >>= 1;
            rlefullbits += 1;
        }

        let mut last = 0u8;
        let mut cur = 0;
        while cur < self.num_codes {
            let value = small.decode_one(reader)?;
            if value != 0 {
                last = (value - 1) as u8;
                self.lengths[cur] = last;
                cur += 1;
            } else {
                let mut count = reader.read(3) as usize + 2;
                if count == 7 + 2 {
                    count += reader.read(rlefullbits) as usize;
                }
                let end = (cur + count).min(self.num_codes);
                self.lengths[cur..end].fill(last);
                cur = end;
            }
        }

        self.build()?;
        if reader.overflow() {
            return Err(DecompressError::Overflow);
        }
        Ok(())
    }

    /// Decode one symbol.
    #[inline]
    pub fn decode_one(&self, reader: &mut BitReader<'_>) -> Result<u32> {
        let entry = self.lookup[reader.peek(self.max_bits as u32) as usize];
        let bits = entry & 0x1f;
        if bits == 0 {
            return Err(DecompressError::InvalidHuffmanCode);
        }
        reader.remove(bits);
        Ok(entry >> 5)
    }

    fn build(&mut self) -> Result<()> {
        self.assign_canonical_codes()?;
        self.build_lookup_table()
    }

    fn assign_canonical_codes(&mut self) -> Result<()> {
        let mut histo = [0u32; 33];
        for &len in &self.lengths {
            if len > self.max_bits {
                return Err(DecompressError::InvalidHuffmanTree("code length exceeds maximum"));
            }
            histo[len as usize] += 1;
        }

        // Starting code per length, longest first
        let mut curstart = 0u32;
        for codelen in (1..=32).rev() {
            let total = curstart + histo[codelen];
            let nextstart = total >> 1;
            if codelen != 1 && nextstart * 2 != total {
                return Err(DecompressError::InvalidHuffmanTree("lengths do not form a prefix code"));
            }
            histo[codelen] = curstart;
            curstart = nextstart;
        }

        for (code, &len) in self.codes.iter_mut().zip(&self.lengths) {
            if len > 0 {
                *code = histo[len as usize];
                histo[len as usize] += 1;
            }
        }
        Ok(())
    }

    fn build_lookup_table(&mut self) -> Result<()> {
        self.lookup.fill(0);
        for (symbol, (&len, &code)) in self.lengths.iter().zip(&self.codes).enumerate() {
            if len == 0 {
                continue;
            }
            let shift = (self.max_bits - len) as u32;
            let start = (code << shift) as usize;
            let end = ((code + 1) << shift) as usize;
            if end > self.lookup.len() {
                return Err(DecompressError::InvalidHuffmanTree("code does not fit the lookup table"));
            }
            self.lookup[start..end].fill(make_lookup(symbol as u32, len));
        }
        Ok(())
    }
}

/// Huffman decoder over `256 + 16` symbols with byte deltas and run codes.
///
/// Symbols below 256 are added to the previous output byte. Symbols from
/// 256 upwards encode a run length; the previous byte is then replayed that
/// many times without touching the bit stream.
#[derive(Clone)]
pub struct RleHuffmanDecoder {
    inner: HuffmanDecoder,
    prev_data: u8,
    rle_remaining: u32,
}

impl RleHuffmanDecoder {
    pub const NUM_CODES: usize = 256 + 16;

    pub fn new(max_bits: u8) -> Self {
        Self {
            inner: HuffmanDecoder::new(Self::NUM_CODES, max_bits),
            prev_data: 0,
            rle_remaining: 0,
        }
    }

    pub fn decoder_mut(&mut self) -> &mut HuffmanDecoder {
        &mut self.inner
    }

    pub fn import_tree_rle(&mut self, reader: &mut BitReader<'_>) -> Result<()> {
        self.inner.import_tree_rle(reader)
    }

    /// Clear the delta base and any pending run.
    pub fn reset(&mut self) {
        self.prev_data = 0;
        self.rle_remaining = 0;
    }

    /// Drop any pending run (called at the end of each video row).
    pub fn flush_rle(&mut self) {
        self.rle_remaining = 0;
    }

    #[inline]
    pub fn decode_one(&mut self, reader: &mut BitReader<'_>) -> Result<u8> {
        if self.rle_remaining != 0 {
            self.rle_remaining -= 1;
            return Ok(self.prev_data);
        }

        let data = self.inner.decode_one(reader)?;
        if data < 0x100 {
            self.prev_data = self.prev_data.wrapping_add(data as u8);
        } else {
            self.rle_remaining = code_to_rle_count(data) - 1;
        }
        Ok(self.prev_data)
    }
}

#[inline]
fn code_to_rle_count(code: u32) -> u32 {
    if code == 0 {
        1
    } else if code <= 0x107 {
        8 + (code - 0x100)
    } else {
        16 << (code - 0x108)
    }
}
