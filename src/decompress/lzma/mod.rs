//! Decode-only LZMA for CHD blocks.
//!
//! CHD stores each block as a bare LZMA1 stream: no `.lzma` header, no
//! uncompressed size, properties fixed at lc=3 lp=0 pb=2 and a dictionary
//! as large as the block. Every block is self-contained, so the output
//! buffer doubles as the dictionary.
//!
//! Decoding stops after exactly `output.len()` bytes. An end-of-stream
//! marker directly after the last byte is tolerated. The range decoder must
//! then be exhausted (`code == 0`) and every compressed byte consumed.

mod range_coder;
mod window;

use self::range_coder::{
    bit_tree_reverse_decode, BitTree, Prob, RangeDecoder, PROB_INIT,
};
use self::window::OutWindow;
use super::{DecompressError, Result};

const NUM_STATES: usize = 12;
const NUM_POS_BITS_MAX: usize = 4;
const NUM_LEN_TO_POS_STATES: usize = 4;
const NUM_ALIGN_BITS: u32 = 4;
const START_POS_MODEL_INDEX: u32 = 4;
const END_POS_MODEL_INDEX: u32 = 14;
const NUM_FULL_DISTANCES: usize = 1 << (END_POS_MODEL_INDEX >> 1);
const MATCH_MIN_LEN: usize = 2;
/// Distance value that marks the end of the stream.
const END_MARKER_DISTANCE: u32 = 0xFFFF_FFFF;

/// LZMA model properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaProperties {
    /// Literal context bits (high bits of the previous byte)
    pub lc: u8,
    /// Literal position bits
    pub lp: u8,
    /// Position bits for match/length contexts
    pub pb: u8,
    pub dict_size: u32,
}

impl LzmaProperties {
    /// Properties CHD uses for a block of `block_size` bytes.
    pub fn chd(block_size: u32) -> Self {
        Self {
            lc: 3,
            lp: 0,
            pb: 2,
            dict_size: block_size,
        }
    }

    /// Parse the classic properties byte `(pb * 5 + lp) * 9 + lc`.
    pub fn from_byte(props: u8, dict_size: u32) -> Result<Self> {
        if props >= 9 * 5 * 5 {
            return Err(DecompressError::CorruptLzma("properties byte out of range"));
        }
        let props = props as u32;
        Ok(Self {
            lc: (props % 9) as u8,
            lp: ((props / 9) % 5) as u8,
            pb: (props / 45) as u8,
            dict_size,
        })
    }

    pub fn to_byte(&self) -> u8 {
        (self.pb * 5 + self.lp) * 9 + self.lc
    }
}

impl Default for LzmaProperties {
    fn default() -> Self {
        Self::chd(0)
    }
}

/// Match length decoder (2..=273).
#[derive(Clone)]
struct LenDecoder {
    choice: Prob,
    choice2: Prob,
    low: Vec<BitTree>,
    mid: Vec<BitTree>,
    high: BitTree,
}

impl LenDecoder {
    fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: (0..1 << NUM_POS_BITS_MAX).map(|_| BitTree::new(3)).collect(),
            mid: (0..1 << NUM_POS_BITS_MAX).map(|_| BitTree::new(3)).collect(),
            high: BitTree::new(8),
        }
    }

    fn reset(&mut self) {
        self.choice = PROB_INIT;
        self.choice2 = PROB_INIT;
        self.low.iter_mut().for_each(BitTree::reset);
        self.mid.iter_mut().for_each(BitTree::reset);
        self.high.reset();
    }

    /// Returns the length minus [`MATCH_MIN_LEN`].
    #[inline]
    fn decode(&mut self, rc: &mut RangeDecoder<'_>, pos_state: usize) -> usize {
        if rc.decode_bit(&mut self.choice) == 0 {
            return self.low[pos_state].decode(rc) as usize;
        }
        if rc.decode_bit(&mut self.choice2) == 0 {
            return 8 + self.mid[pos_state].decode(rc) as usize;
        }
        16 + self.high.decode(rc) as usize
    }
}

#[inline]
fn update_literal(state: usize) -> usize {
    if state < 4 {
        0
    } else if state < 10 {
        state - 3
    } else {
        state - 6
    }
}

#[inline]
fn update_match(state: usize) -> usize {
    if state < 7 {
        7
    } else {
        10
    }
}

#[inline]
fn update_rep(state: usize) -> usize {
    if state < 7 {
        8
    } else {
        11
    }
}

#[inline]
fn update_short_rep(state: usize) -> usize {
    if state < 7 {
        9
    } else {
        11
    }
}

/// Reusable LZMA decoder.
///
/// Probability tables are allocated once and reset per block, so one
/// decoder per worker thread serves every LZMA block it sees.
pub struct LzmaDecoder {
    props: LzmaProperties,
    literal_probs: Vec<Prob>,
    pos_slot: Vec<BitTree>,
    pos_decoders: Vec<Prob>,
    align: BitTree,
    is_match: [Prob; NUM_STATES << NUM_POS_BITS_MAX],
    is_rep: [Prob; NUM_STATES],
    is_rep_g0: [Prob; NUM_STATES],
    is_rep_g1: [Prob; NUM_STATES],
    is_rep_g2: [Prob; NUM_STATES],
    is_rep0_long: [Prob; NUM_STATES << NUM_POS_BITS_MAX],
    len_decoder: LenDecoder,
    rep_len_decoder: LenDecoder,
}

impl LzmaDecoder {
    pub fn new(props: LzmaProperties) -> Self {
        Self {
            props,
            literal_probs: vec![PROB_INIT; 0x300 << (props.lc + props.lp)],
            pos_slot: (0..NUM_LEN_TO_POS_STATES).map(|_| BitTree::new(6)).collect(),
            pos_decoders: vec![PROB_INIT; 1 + NUM_FULL_DISTANCES - END_POS_MODEL_INDEX as usize],
            align: BitTree::new(NUM_ALIGN_BITS),
            is_match: [PROB_INIT; NUM_STATES << NUM_POS_BITS_MAX],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep_g0: [PROB_INIT; NUM_STATES],
            is_rep_g1: [PROB_INIT; NUM_STATES],
            is_rep_g2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [PROB_INIT; NUM_STATES << NUM_POS_BITS_MAX],
            len_decoder: LenDecoder::new(),
            rep_len_decoder: LenDecoder::new(),
        }
    }

    /// Decoder with the fixed CHD properties.
    pub fn chd(block_size: u32) -> Self {
        Self::new(LzmaProperties::chd(block_size))
    }

    pub fn properties(&self) -> LzmaProperties {
        self.props
    }

    /// Switch to different properties, reallocating the literal table only
    /// when its size changes.
    pub fn set_properties(&mut self, props: LzmaProperties) {
        let literal_len = 0x300 << (props.lc + props.lp);
        if self.literal_probs.len() != literal_len {
            self.literal_probs = vec![PROB_INIT; literal_len];
        }
        self.props = props;
    }

    /// Reset all probabilities to their initial state.
    pub fn reset(&mut self) {
        self.literal_probs.fill(PROB_INIT);
        self.pos_slot.iter_mut().for_each(BitTree::reset);
        self.pos_decoders.fill(PROB_INIT);
        self.align.reset();
        self.is_match.fill(PROB_INIT);
        self.is_rep.fill(PROB_INIT);
        self.is_rep_g0.fill(PROB_INIT);
        self.is_rep_g1.fill(PROB_INIT);
        self.is_rep_g2.fill(PROB_INIT);
        self.is_rep0_long.fill(PROB_INIT);
        self.len_decoder.reset();
        self.rep_len_decoder.reset();
    }

    /// Decode `input` into exactly `output.len()` bytes.
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<()> {
        self.reset();
        let mut rc = RangeDecoder::new(input)?;
        let mut out = OutWindow::new(output);

        let pb_mask = (1usize << self.props.pb) - 1;
        let mut state = 0usize;
        let mut rep0 = 0u32;
        let mut rep1 = 0u32;
        let mut rep2 = 0u32;
        let mut rep3 = 0u32;

        while !out.is_full() {
            let pos_state = out.position() & pb_mask;

            if rc.decode_bit(&mut self.is_match[(state << NUM_POS_BITS_MAX) + pos_state]) == 0 {
                self.decode_literal(&mut rc, &mut out, state, rep0);
                state = update_literal(state);
                continue;
            }

            let len;
            if rc.decode_bit(&mut self.is_rep[state]) != 0 {
                if out.is_empty() {
                    return Err(DecompressError::CorruptLzma("repeat match before any output"));
                }
                if rc.decode_bit(&mut self.is_rep_g0[state]) == 0 {
                    let idx = (state << NUM_POS_BITS_MAX) + pos_state;
                    if rc.decode_bit(&mut self.is_rep0_long[idx]) == 0 {
                        state = update_short_rep(state);
                        let byte = out.get_byte(rep0 as usize + 1);
                        out.put_byte(byte);
                        continue;
                    }
                } else {
                    let dist;
                    if rc.decode_bit(&mut self.is_rep_g1[state]) == 0 {
                        dist = rep1;
                    } else {
                        if rc.decode_bit(&mut self.is_rep_g2[state]) == 0 {
                            dist = rep2;
                        } else {
                            dist = rep3;
                            rep3 = rep2;
                        }
                        rep2 = rep1;
                    }
                    rep1 = rep0;
                    rep0 = dist;
                }
                len = self.rep_len_decoder.decode(&mut rc, pos_state);
                state = update_rep(state);
            } else {
                rep3 = rep2;
                rep2 = rep1;
                rep1 = rep0;
                len = self.len_decoder.decode(&mut rc, pos_state);
                state = update_match(state);
                rep0 = self.decode_distance(&mut rc, len);
                if rep0 == END_MARKER_DISTANCE {
                    return Err(DecompressError::ShortOutput {
                        expected: out.position() + out.remaining(),
                        actual: out.position(),
                    });
                }
                if rep0 as usize >= out.position() {
                    return Err(DecompressError::InvalidBackReference {
                        distance: rep0.saturating_add(1),
                        position: out.position(),
                    });
                }
            }

            out.copy_match(rep0 as usize + 1, len + MATCH_MIN_LEN)?;
        }

        if !rc.is_finished_ok() {
            self.decode_end_marker(&mut rc, out.position() & pb_mask, state)?;
        }
        if !rc.is_finished_ok() {
            return Err(DecompressError::CorruptLzma("range decoder not exhausted"));
        }
        if rc.is_corrupted() {
            return Err(DecompressError::CorruptLzma("impossible direct bits"));
        }
        if rc.consumed() != input.len() {
            return Err(DecompressError::InputLengthMismatch {
                expected: input.len(),
                consumed: rc.consumed(),
            });
        }
        Ok(())
    }

    /// After the last byte the only symbol allowed is a plain match with
    /// the end-marker distance.
    fn decode_end_marker(
        &mut self,
        rc: &mut RangeDecoder<'_>,
        pos_state: usize,
        state: usize,
    ) -> Result<()> {
        if rc.decode_bit(&mut self.is_match[(state << NUM_POS_BITS_MAX) + pos_state]) == 0
            || rc.decode_bit(&mut self.is_rep[state]) != 0
        {
            return Err(DecompressError::CorruptLzma("data after the last output byte"));
        }
        let len = self.len_decoder.decode(rc, pos_state);
        if self.decode_distance(rc, len) != END_MARKER_DISTANCE {
            return Err(DecompressError::PendingCopy {
                pending: len + MATCH_MIN_LEN,
            });
        }
        Ok(())
    }

    #[inline]
    fn decode_literal(
        &mut self,
        rc: &mut RangeDecoder<'_>,
        out: &mut OutWindow<'_>,
        state: usize,
        rep0: u32,
    ) {
        let lc = self.props.lc as u32;
        let lp_mask = (1usize << self.props.lp) - 1;
        let prev_byte = if out.is_empty() { 0 } else { out.get_byte(1) };
        let lit_state = ((out.position() & lp_mask) << lc) + (prev_byte as usize >> (8 - lc));
        let probs = &mut self.literal_probs[0x300 * lit_state..0x300 * (lit_state + 1)];

        let mut symbol = 1usize;
        if state >= 7 {
            let mut match_byte = out.get_byte(rep0 as usize + 1) as usize;
            while symbol < 0x100 {
                let match_bit = (match_byte >> 7) & 1;
                match_byte <<= 1;
                let bit = rc.decode_bit(&mut probs[((1 + match_bit) << 8) + symbol]) as usize;
                symbol = (symbol << 1) | bit;
                if match_bit != bit {
                    break;
                }
            }
        }
        while symbol < 0x100 {
            symbol = (symbol << 1) | rc.decode_bit(&mut probs[symbol]) as usize;
        }
        out.put_byte((symbol - 0x100) as u8);
    }

    /// Decode a zero-based match distance for a length of `len + 2`.
    #[inline]
    fn decode_distance(&mut self, rc: &mut RangeDecoder<'_>, len: usize) -> u32 {
        let len_state = len.min(NUM_LEN_TO_POS_STATES - 1);
        let pos_slot = self.pos_slot[len_state].decode(rc);
        if pos_slot < START_POS_MODEL_INDEX {
            return pos_slot;
        }

        let num_direct_bits = (pos_slot >> 1) - 1;
        let mut dist = (2 | (pos_slot & 1)) << num_direct_bits;
        if pos_slot < END_POS_MODEL_INDEX {
            let base = (dist - pos_slot) as usize;
            dist += bit_tree_reverse_decode(&mut self.pos_decoders[base..], num_direct_bits, rc);
        } else {
            dist = dist.wrapping_add(rc.decode_direct_bits(num_direct_bits - NUM_ALIGN_BITS) << NUM_ALIGN_BITS);
            dist = dist.wrapping_add(self.align.reverse_decode(rc));
        }
        dist
    }
}
