//! CD-ROM frame reassembly for the `cdzl`, `cdlz` and `cdfl` codecs.
//!
//! A CD block holds `block_size / 2448` frames. The compressor splits them
//! into two streams, all 2352-byte sector payloads followed by all 96-byte
//! subcode payloads, and compresses each separately:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────┬─────────────────┐
//! │ ECC bitmap   │ base length  │ sector stream    │ subcode stream  │
//! │ ⌈frames/8⌉ B │ 2 or 3 B, BE │ base codec       │ deflate         │
//! └──────────────┴──────────────┴──────────────────┴─────────────────┘
//! ```
//!
//! The base length is 3 bytes when the block is 64 KiB or larger. Sectors
//! flagged in the bitmap had their sync header and P/Q parity stripped
//! before compression; both are regenerated here. `cdfl` has no header at
//! all: the FLAC sector stream runs until the decoder stops, and the deflate
//! subcode stream starts at that byte.

use super::audio::{self, AudioFrameDecoder};
use super::{DecompressError, Inflater, LzmaDecoder, Result};
use crate::formats::{CD_FRAME_SIZE, CD_MAX_SECTOR_DATA, CD_MAX_SUBCODE_DATA, CD_SYNC_HEADER};

const MODE_OFFSET: usize = 0x00F;
const ECC_P_OFFSET: usize = 0x81C;
const ECC_P_NUM_BYTES: usize = 86;
const ECC_P_COMP: usize = 24;
const ECC_Q_OFFSET: usize = ECC_P_OFFSET + 2 * ECC_P_NUM_BYTES;
const ECC_Q_NUM_BYTES: usize = 52;
const ECC_Q_COMP: usize = 43;

/// Multiply by x in GF(2^8) with polynomial 0x11D.
const ECC_LOW: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let v = (i << 1) ^ if i & 0x80 != 0 { 0x11D } else { 0 };
        table[i] = v as u8;
        i += 1;
    }
    table
};

/// Divide by (x + 1): `ECC_HIGH[i ^ ECC_LOW[i]] == i`.
const ECC_HIGH: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i ^ ECC_LOW[i] as usize] = i as u8;
        i += 1;
    }
    table
};

/// Offset (relative to byte 12) of component `comp` of P row `row`.
#[inline]
const fn p_offset(row: usize, comp: usize) -> usize {
    86 * comp + row
}

/// Offset (relative to byte 12) of component `comp` of Q row `row`.
#[inline]
const fn q_offset(row: usize, comp: usize) -> usize {
    2 * ((44 * comp + 43 * (row >> 1)) % 1118) + (row & 1)
}

/// Mode 2 sectors exclude the 4 header bytes from parity.
#[inline]
fn ecc_source_byte(sector: &[u8], offset: usize) -> u8 {
    if sector[MODE_OFFSET] == 2 && offset < 4 {
        0
    } else {
        sector[CD_SYNC_HEADER.len() + offset]
    }
}

fn ecc_compute_bytes(
    sector: &[u8],
    row: usize,
    comps: usize,
    offset: fn(usize, usize) -> usize,
) -> (u8, u8) {
    let mut val1 = 0u8;
    let mut val2 = 0u8;
    for comp in 0..comps {
        let byte = ecc_source_byte(sector, offset(row, comp));
        val1 ^= byte;
        val2 ^= byte;
        val1 = ECC_LOW[val1 as usize];
    }
    val1 = ECC_HIGH[(ECC_LOW[val1 as usize] ^ val2) as usize];
    val2 ^= val1;
    (val1, val2)
}

/// Regenerate the P and Q parity of a 2352-byte sector in place.
pub fn ecc_generate(sector: &mut [u8]) {
    debug_assert!(sector.len() >= CD_MAX_SECTOR_DATA);
    for row in 0..ECC_P_NUM_BYTES {
        let (p1, p2) = ecc_compute_bytes(sector, row, ECC_P_COMP, p_offset);
        sector[ECC_P_OFFSET + row] = p1;
        sector[ECC_P_OFFSET + ECC_P_NUM_BYTES + row] = p2;
    }
    // Q covers the P bytes just written
    for row in 0..ECC_Q_NUM_BYTES {
        let (q1, q2) = ecc_compute_bytes(sector, row, ECC_Q_COMP, q_offset);
        sector[ECC_Q_OFFSET + row] = q1;
        sector[ECC_Q_OFFSET + ECC_Q_NUM_BYTES + row] = q2;
    }
}

/// Check whether a sector's stored parity matches its contents.
pub fn ecc_verify(sector: &[u8]) -> bool {
    let p_ok = (0..ECC_P_NUM_BYTES).all(|row| {
        let (p1, p2) = ecc_compute_bytes(sector, row, ECC_P_COMP, p_offset);
        sector[ECC_P_OFFSET + row] == p1 && sector[ECC_P_OFFSET + ECC_P_NUM_BYTES + row] == p2
    });
    p_ok && (0..ECC_Q_NUM_BYTES).all(|row| {
        let (q1, q2) = ecc_compute_bytes(sector, row, ECC_Q_COMP, q_offset);
        sector[ECC_Q_OFFSET + row] == q1 && sector[ECC_Q_OFFSET + ECC_Q_NUM_BYTES + row] == q2
    })
}

/// Layout of the header in front of a `cdzl`/`cdlz` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdHeader {
    pub frames: usize,
    pub ecc_bytes: usize,
    pub header_bytes: usize,
    /// Compressed length of the sector stream
    pub base_len: usize,
}

impl CdHeader {
    pub fn parse(input: &[u8], block_len: usize) -> Result<Self> {
        let frames = block_len / CD_FRAME_SIZE;
        if frames == 0 {
            return Err(DecompressError::InvalidHeader("block smaller than one CD frame"));
        }
        let complen_bytes = if block_len < 65536 { 2 } else { 3 };
        let ecc_bytes = frames.div_ceil(8);
        let header_bytes = ecc_bytes + complen_bytes;
        if input.len() < header_bytes {
            return Err(DecompressError::InvalidHeader("truncated CD header"));
        }

        let base_len = input[ecc_bytes..header_bytes]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        if header_bytes + base_len > input.len() {
            return Err(DecompressError::InvalidHeader("sector stream length exceeds payload"));
        }

        Ok(Self {
            frames,
            ecc_bytes,
            header_bytes,
            base_len,
        })
    }
}

/// Base codec of the sector stream.
pub enum SectorCodec<'a> {
    Deflate,
    Lzma(&'a mut LzmaDecoder),
}

/// Per-worker scratch for the two decoded streams.
#[derive(Default)]
pub struct CdScratch {
    sectors: Vec<u8>,
    subcode: Vec<u8>,
}

impl CdScratch {
    fn prepare(&mut self, frames: usize) {
        self.sectors.resize(frames * CD_MAX_SECTOR_DATA, 0);
        self.subcode.resize(frames * CD_MAX_SUBCODE_DATA, 0);
    }
}

/// Decode a `cdzl` or `cdlz` payload into `output`.
pub fn decode(
    input: &[u8],
    output: &mut [u8],
    sector_codec: SectorCodec<'_>,
    inflater: &mut Inflater,
    scratch: &mut CdScratch,
) -> Result<()> {
    let header = CdHeader::parse(input, output.len())?;
    scratch.prepare(header.frames);

    let base_end = header.header_bytes + header.base_len;
    let base = &input[header.header_bytes..base_end];
    match sector_codec {
        SectorCodec::Deflate => {
            inflater.inflate(base, &mut scratch.sectors)?;
        }
        SectorCodec::Lzma(lzma) => lzma.decode(base, &mut scratch.sectors)?,
    }
    inflater.inflate(&input[base_end..], &mut scratch.subcode)?;

    reassemble(output, scratch, Some(&input[..header.ecc_bytes]));
    Ok(())
}

/// Decode a `cdfl` payload: big-endian FLAC sectors, then deflate subcode.
pub fn decode_flac(
    input: &[u8],
    output: &mut [u8],
    audio: &mut dyn AudioFrameDecoder,
    inflater: &mut Inflater,
    scratch: &mut CdScratch,
) -> Result<()> {
    let frames = output.len() / CD_FRAME_SIZE;
    if frames == 0 {
        return Err(DecompressError::InvalidHeader("block smaller than one CD frame"));
    }
    scratch.prepare(frames);

    let consumed = audio::decode_pcm(audio, input, &mut scratch.sectors, true)?;
    inflater.inflate(&input[consumed..], &mut scratch.subcode)?;

    reassemble(output, scratch, None);
    Ok(())
}

/// Interleave sectors and subcode into frames, restoring sync and parity for
/// sectors flagged in `ecc_bitmap`. Bytes past the last whole frame are zeroed.
fn reassemble(output: &mut [u8], scratch: &CdScratch, ecc_bitmap: Option<&[u8]>) {
    let frames = scratch.subcode.len() / CD_MAX_SUBCODE_DATA;
    let sectors = scratch.sectors.chunks_exact(CD_MAX_SECTOR_DATA);
    let subcodes = scratch.subcode.chunks_exact(CD_MAX_SUBCODE_DATA);

    for (framenum, ((frame, sector), subcode)) in output
        .chunks_exact_mut(CD_FRAME_SIZE)
        .zip(sectors)
        .zip(subcodes)
        .enumerate()
    {
        frame[..CD_MAX_SECTOR_DATA].copy_from_slice(sector);
        frame[CD_MAX_SECTOR_DATA..].copy_from_slice(subcode);

        let flagged = ecc_bitmap.is_some_and(|bitmap| bitmap[framenum / 8] & (1 << (framenum % 8)) != 0);
        if flagged {
            frame[..CD_SYNC_HEADER.len()].copy_from_slice(&CD_SYNC_HEADER);
            ecc_generate(&mut frame[..CD_MAX_SECTOR_DATA]);
        }
    }

    output[frames * CD_FRAME_SIZE..].fill(0);
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;

    /// GF(2^8) multiply, polynomial 0x11D, without the tables.
    fn gf_mul(mut a: u8, mut b: u8) -> u8 {
        let mut product = 0u8;
        while b != 0 {
            if b & 1 != 0 {
                product ^= a;
            }
            let carry = a & 0x80 != 0;
            a <<= 1;
            if carry {
                a ^= 0x1D;
            }
            b >>= 1;
        }
        product
    }

    fn gf_pow2(exp: usize) -> u8 {
        (0..exp).fold(1u8, |acc, _| gf_mul(acc, 2))
    }

    /// Both Reed-Solomon syndromes of a codeword (highest power first).
    fn syndromes(codeword: &[u8]) -> (u8, u8) {
        let n = codeword.len();
        codeword.iter().enumerate().fold((0, 0), |(s0, s1), (i, &c)| {
            (s0 ^ c, s1 ^ gf_mul(c, gf_pow2(n - 1 - i)))
        })
    }

    fn mode1_sector(seed: u8) -> Vec<u8> {
        let mut sector = vec![0u8; CD_MAX_SECTOR_DATA];
        sector[..12].copy_from_slice(&CD_SYNC_HEADER);
        sector[12..15].copy_from_slice(&[0x00, 0x02, 0x16]);
        sector[MODE_OFFSET] = 1;
        for (i, byte) in sector[16..16 + 2048].iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(31).wrapping_add(seed);
        }
        sector
    }

    #[test]
    fn test_gf_tables() {
        for i in 0..=255u8 {
            assert_eq!(ECC_LOW[i as usize], gf_mul(i, 2));
            // (x + 1) * high(i) == i
            assert_eq!(gf_mul(ECC_HIGH[i as usize], 3), i);
        }
    }

    #[test]
    fn test_q_offsets() {
        assert_eq!(q_offset(0, 1), 0x058);
        assert_eq!(q_offset(1, 0), 0x001);
        assert_eq!(q_offset(2, 0), 0x056);
        assert_eq!(q_offset(2, 1), 0x0AE);
        assert_eq!(p_offset(0, 1), 0x056);
    }

    /// Every P and Q row of `sector` must be a Reed-Solomon codeword.
    /// Only header-bearing (Mode 1) sectors are covered.
    pub(crate) fn assert_parity_codewords(sector: &[u8]) {
        for row in 0..ECC_P_NUM_BYTES {
            let mut codeword: Vec<u8> = (0..ECC_P_COMP)
                .map(|comp| sector[12 + p_offset(row, comp)])
                .collect();
            codeword.push(sector[ECC_P_OFFSET + row]);
            codeword.push(sector[ECC_P_OFFSET + ECC_P_NUM_BYTES + row]);
            assert_eq!(syndromes(&codeword), (0, 0), "P row {row}");
        }
        for row in 0..ECC_Q_NUM_BYTES {
            let mut codeword: Vec<u8> = (0..ECC_Q_COMP)
                .map(|comp| sector[12 + q_offset(row, comp)])
                .collect();
            codeword.push(sector[ECC_Q_OFFSET + row]);
            codeword.push(sector[ECC_Q_OFFSET + ECC_Q_NUM_BYTES + row]);
            assert_eq!(syndromes(&codeword), (0, 0), "Q row {row}");
        }
    }

    #[test]
    fn test_generated_parity_forms_codewords() {
        let mut sector = mode1_sector(7);
        ecc_generate(&mut sector);
        assert_parity_codewords(&sector);
        assert!(ecc_verify(&sector));
    }

    #[test]
    fn test_mode2_ignores_header() {
        let mut a = mode1_sector(3);
        a[MODE_OFFSET] = 2;
        let mut b = a.clone();
        b[12..15].copy_from_slice(&[0x11, 0x22, 0x33]);
        ecc_generate(&mut a);
        ecc_generate(&mut b);
        assert_eq!(a[ECC_P_OFFSET..], b[ECC_P_OFFSET..]);
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut sector = mode1_sector(1);
        ecc_generate(&mut sector);
        sector[100] ^= 0x01;
        assert!(!ecc_verify(&sector));
    }

    #[test]
    fn test_header_parse() {
        // 8 frames, < 64 KiB: 1 bitmap byte + 2 length bytes
        let block_len = 8 * CD_FRAME_SIZE;
        let input = [0x01, 0x00, 0x02, 0xAA, 0xBB, 0xCC];
        let header = CdHeader::parse(&input, block_len).unwrap();
        assert_eq!(header.frames, 8);
        assert_eq!(header.ecc_bytes, 1);
        assert_eq!(header.header_bytes, 3);
        assert_eq!(header.base_len, 2);

        // 32 frames, >= 64 KiB: 4 bitmap bytes + 3 length bytes
        let block_len = 32 * CD_FRAME_SIZE;
        let input = [0, 0, 0, 0, 0x00, 0x00, 0x01, 0xFF];
        let header = CdHeader::parse(&input, block_len).unwrap();
        assert_eq!(header.header_bytes, 7);
        assert_eq!(header.base_len, 1);
    }

    #[test]
    fn test_header_rejects_overlong_base() {
        let input = [0x00, 0x10, 0x00];
        assert!(matches!(
            CdHeader::parse(&input, CD_FRAME_SIZE),
            Err(DecompressError::InvalidHeader(_))
        ));
        assert!(CdHeader::parse(&input, 100).is_err());
    }
}
