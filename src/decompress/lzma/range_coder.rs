//! Range decoder and adaptive bit models for LZMA.
//!
//! The decoder is carry-less: 32-bit `range`/`code`, renormalized one input
//! byte at a time whenever `range` drops below 2^24. Probabilities are 11-bit
//! and adapt by 1/32 of the distance to the extreme after every bit.

use super::super::{DecompressError, Result};

/// Bits of precision in a probability.
const NUM_BIT_MODEL_TOTAL_BITS: u32 = 11;
const BIT_MODEL_TOTAL: u32 = 1 << NUM_BIT_MODEL_TOTAL_BITS;
/// Adaptation speed.
const NUM_MOVE_BITS: u32 = 5;
/// Renormalization threshold (2^24).
const TOP_VALUE: u32 = 1 << 24;

/// Adaptive probability of a zero bit.
pub type Prob = u16;

/// Initial probability (0.5).
pub const PROB_INIT: Prob = (BIT_MODEL_TOTAL / 2) as Prob;

/// Range decoder state over a complete compressed block.
pub struct RangeDecoder<'a> {
    input: &'a [u8],
    /// Bytes pulled from `input`, including any past its end
    pos: usize,
    range: u32,
    code: u32,
    corrupted: bool,
}

impl<'a> RangeDecoder<'a> {
    /// Create a range decoder, consuming the 5-byte preamble.
    pub fn new(input: &'a [u8]) -> Result<Self> {
        if input.len() < 5 {
            return Err(DecompressError::UnexpectedEof);
        }
        if input[0] != 0 {
            return Err(DecompressError::CorruptLzma("first range coder byte is not zero"));
        }
        let code = u32::from_be_bytes([input[1], input[2], input[3], input[4]]);
        if code == u32::MAX {
            return Err(DecompressError::CorruptLzma("initial code equals range"));
        }
        Ok(Self {
            input,
            pos: 5,
            range: u32::MAX,
            code,
            corrupted: false,
        })
    }

    /// Get next byte from input, zero past the end.
    #[inline]
    fn next_byte(&mut self) -> u8 {
        let byte = self.input.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte
    }

    #[inline]
    fn normalize(&mut self) {
        if self.range < TOP_VALUE {
            self.range <<= 8;
            self.code = (self.code << 8) | u32::from(self.next_byte());
        }
    }

    /// Decode one bit against an adaptive probability.
    #[inline]
    pub fn decode_bit(&mut self, prob: &mut Prob) -> u32 {
        let p = u32::from(*prob);
        let bound = (self.range >> NUM_BIT_MODEL_TOTAL_BITS) * p;
        let bit = if self.code < bound {
            *prob = (p + ((BIT_MODEL_TOTAL - p) >> NUM_MOVE_BITS)) as Prob;
            self.range = bound;
            0
        } else {
            *prob = (p - (p >> NUM_MOVE_BITS)) as Prob;
            self.code -= bound;
            self.range -= bound;
            1
        };
        self.normalize();
        bit
    }

    /// Decode `num_bits` bits with fixed probability 0.5, MSB first.
    pub fn decode_direct_bits(&mut self, num_bits: u32) -> u32 {
        let mut result = 0u32;
        for _ in 0..num_bits {
            self.range >>= 1;
            self.code = self.code.wrapping_sub(self.range);
            let t = 0u32.wrapping_sub(self.code >> 31);
            self.code = self.code.wrapping_add(self.range & t);
            if self.code == self.range {
                self.corrupted = true;
            }
            self.normalize();
            result = (result << 1).wrapping_add(t.wrapping_add(1));
        }
        result
    }

    /// Whether the encoder's final flush has been fully absorbed.
    pub fn is_finished_ok(&self) -> bool {
        self.code == 0
    }

    /// Whether a direct-bit decode hit an impossible code value.
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// Input bytes consumed so far (may exceed the input length).
    pub fn consumed(&self) -> usize {
        self.pos
    }
}

/// Decode `num_bits` bits through a binary tree of probabilities, MSB first.
///
/// `probs` is indexed from 1; it must hold at least `1 << num_bits` entries.
#[inline]
pub fn bit_tree_decode(probs: &mut [Prob], num_bits: u32, rc: &mut RangeDecoder<'_>) -> u32 {
    let mut m = 1usize;
    for _ in 0..num_bits {
        m = (m << 1) + rc.decode_bit(&mut probs[m]) as usize;
    }
    (m - (1 << num_bits)) as u32
}

/// Decode `num_bits` bits through a binary tree, LSB first.
#[inline]
pub fn bit_tree_reverse_decode(
    probs: &mut [Prob],
    num_bits: u32,
    rc: &mut RangeDecoder<'_>,
) -> u32 {
    let mut m = 1usize;
    let mut symbol = 0u32;
    for i in 0..num_bits {
        let bit = rc.decode_bit(&mut probs[m]);
        m = (m << 1) + bit as usize;
        symbol |= bit << i;
    }
    symbol
}

/// Fixed-depth bit tree with its own probability table.
#[derive(Clone)]
pub struct BitTree {
    num_bits: u32,
    probs: Vec<Prob>,
}

impl BitTree {
    pub fn new(num_bits: u32) -> Self {
        Self {
            num_bits,
            probs: vec![PROB_INIT; 1 << num_bits],
        }
    }

    pub fn reset(&mut self) {
        self.probs.fill(PROB_INIT);
    }

    #[inline]
    pub fn decode(&mut self, rc: &mut RangeDecoder<'_>) -> u32 {
        bit_tree_decode(&mut self.probs, self.num_bits, rc)
    }

    #[inline]
    pub fn reverse_decode(&mut self, rc: &mut RangeDecoder<'_>) -> u32 {
        bit_tree_reverse_decode(&mut self.probs, self.num_bits, rc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_nonzero_first_byte() {
        assert!(matches!(
            RangeDecoder::new(&[1, 0, 0, 0, 0]),
            Err(DecompressError::CorruptLzma(_))
        ));
    }

    #[test]
    fn test_rejects_short_preamble() {
        assert!(matches!(
            RangeDecoder::new(&[0, 0, 0]),
            Err(DecompressError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_zero_code_decodes_zero_bits() {
        // code = 0 is always below the bound, so every bit is 0 and the
        // probability moves towards "zero is likely"
        let input = [0u8; 16];
        let mut rc = RangeDecoder::new(&input).unwrap();
        let mut prob = PROB_INIT;
        for _ in 0..8 {
            assert_eq!(rc.decode_bit(&mut prob), 0);
        }
        assert!(prob > PROB_INIT);
        assert!(rc.is_finished_ok());
    }

    #[test]
    fn test_all_ones_code_decodes_one_bits() {
        let input = [0x00, 0xFF, 0xFF, 0xFF, 0xFE, 0xFF, 0xFF, 0xFF];
        let mut rc = RangeDecoder::new(&input).unwrap();
        let mut tree = BitTree::new(3);
        assert_eq!(tree.decode(&mut rc), 7);
    }
}
