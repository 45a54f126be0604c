//! AVHuff blocks: laserdisc audio and video in one payload.
//!
//! Compressed layout:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | metadata length |
//! | 1 | 1 | audio channels |
//! | 2 | 2 | samples per channel |
//! | 4 | 2 | video width |
//! | 6 | 2 | video height |
//! | 8 | 2 | audio tree size (`0xFFFF` = FLAC channels) |
//! | 10 | 2 × channels | compressed size per channel |
//!
//! followed by metadata, the audio trees, each channel's data and finally
//! the video stream. The decoded block starts with a `chav` header, then
//! metadata, big-endian 16-bit samples per channel and YUY2 rows, and is
//! zero-padded to the block size.

use super::audio::{self, AudioFrameDecoder};
use super::{BitReader, DecompressError, HuffmanDecoder, Result, RleHuffmanDecoder};
use crate::formats::Codec;

const INPUT_HEADER_LEN: usize = 10;
const OUTPUT_HEADER_LEN: usize = 12;
const FLAC_TREE_SIZE: usize = 0xFFFF;
const MAX_CHANNELS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct AvHeader {
    meta_len: usize,
    channels: usize,
    samples: usize,
    width: usize,
    height: usize,
    tree_size: usize,
}

impl AvHeader {
    fn parse(input: &[u8]) -> Result<Self> {
        if input.len() < INPUT_HEADER_LEN {
            return Err(DecompressError::InvalidHeader("AVHuff header truncated"));
        }
        let be16 = |at: usize| u16::from_be_bytes([input[at], input[at + 1]]) as usize;
        Ok(Self {
            meta_len: input[0] as usize,
            channels: input[1] as usize,
            samples: be16(2),
            width: be16(4),
            height: be16(6),
            tree_size: be16(8),
        })
    }

    fn is_flac(&self) -> bool {
        self.tree_size == FLAC_TREE_SIZE
    }

    fn decoded_len(&self) -> usize {
        OUTPUT_HEADER_LEN + self.meta_len + self.channels * 2 * self.samples + self.width * self.height * 2
    }
}

/// Decode an `avhu` block into `output`.
///
/// `flac` is only consulted when the audio channels are FLAC coded.
pub fn decode(
    input: &[u8],
    output: &mut [u8],
    flac: Option<&mut dyn AudioFrameDecoder>,
) -> Result<()> {
    let header = AvHeader::parse(input)?;
    if header.channels > MAX_CHANNELS {
        return Err(DecompressError::InvalidHeader("too many AVHuff audio channels"));
    }

    let mut total = INPUT_HEADER_LEN + 2 * header.channels;
    if input.len() < total {
        return Err(DecompressError::InvalidHeader("AVHuff channel table truncated"));
    }
    let channel_sizes: Vec<usize> = (0..header.channels)
        .map(|ch| u16::from_be_bytes([input[10 + 2 * ch], input[11 + 2 * ch]]) as usize)
        .collect();

    total += header.meta_len;
    if !header.is_flac() {
        total += header.tree_size;
    }
    total += channel_sizes.iter().sum::<usize>();
    if total >= input.len() {
        return Err(DecompressError::InvalidHeader("AVHuff streams exceed payload"));
    }
    if header.decoded_len() > output.len() {
        return Err(DecompressError::InvalidHeader("AVHuff frame larger than block"));
    }

    output[0..4].copy_from_slice(b"chav");
    output[4] = header.meta_len as u8;
    output[5] = header.channels as u8;
    output[6..8].copy_from_slice(&(header.samples as u16).to_be_bytes());
    output[8..10].copy_from_slice(&(header.width as u16).to_be_bytes());
    output[10..12].copy_from_slice(&(header.height as u16).to_be_bytes());

    let src = INPUT_HEADER_LEN + 2 * header.channels;
    let mut dst = OUTPUT_HEADER_LEN;
    output[dst..dst + header.meta_len].copy_from_slice(&input[src..src + header.meta_len]);
    dst += header.meta_len;

    let audio_len = header.channels * 2 * header.samples;
    if audio_len > 0 {
        let audio_out = &mut output[dst..dst + audio_len];
        decode_audio(&header, &channel_sizes, input, src + header.meta_len, audio_out, flac)?;
    }
    dst += audio_len;

    // Video follows everything counted in `total`
    let video_len = header.width * header.height * 2;
    if header.width > 0 && header.height > 0 {
        decode_video(&header, &input[total..], &mut output[dst..dst + video_len])?;
    }
    output[dst + video_len..].fill(0);
    Ok(())
}

fn decode_audio(
    header: &AvHeader,
    channel_sizes: &[usize],
    input: &[u8],
    mut src: usize,
    output: &mut [u8],
    flac: Option<&mut dyn AudioFrameDecoder>,
) -> Result<()> {
    let channel_bytes = 2 * header.samples;

    if header.is_flac() {
        let flac = flac.ok_or(DecompressError::UnsupportedCodec(Codec::AVHUFF))?;
        for (&size, out) in channel_sizes.iter().zip(output.chunks_exact_mut(channel_bytes)) {
            audio::decode_pcm(&mut *flac, &input[src..src + size], out, true)?;
            src += size;
        }
        return Ok(());
    }

    let mut trees = None;
    if header.tree_size != 0 {
        let mut reader = BitReader::new(&input[src..src + header.tree_size]);
        let mut hi = HuffmanDecoder::new(256, 16);
        let mut lo = HuffmanDecoder::new(256, 16);
        hi.import_tree_rle(&mut reader)?;
        reader.flush();
        lo.import_tree_rle(&mut reader)?;
        if reader.flush() != header.tree_size {
            return Err(DecompressError::InvalidHuffmanTree("audio trees do not fill their size"));
        }
        src += header.tree_size;
        trees = Some((hi, lo));
    }

    for (&size, out) in channel_sizes.iter().zip(output.chunks_exact_mut(channel_bytes)) {
        let data = &input[src..src + size];
        let mut prev = 0i16;
        match &trees {
            None => {
                if data.len() < channel_bytes {
                    return Err(DecompressError::InvalidHeader("raw audio channel truncated"));
                }
                for (sample, delta) in out.chunks_exact_mut(2).zip(data.chunks_exact(2)) {
                    prev = prev.wrapping_add(i16::from_be_bytes([delta[0], delta[1]]));
                    sample.copy_from_slice(&prev.to_be_bytes());
                }
            }
            Some((hi, lo)) => {
                let mut reader = BitReader::new(data);
                for sample in out.chunks_exact_mut(2) {
                    let high = hi.decode_one(&mut reader)?;
                    let low = lo.decode_one(&mut reader)?;
                    let delta = ((high << 8) | low) as u16 as i16;
                    prev = prev.wrapping_add(delta);
                    sample.copy_from_slice(&prev.to_be_bytes());
                }
                if reader.overflow() {
                    return Err(DecompressError::Overflow);
                }
            }
        }
        src += size;
    }
    Ok(())
}

fn decode_video(header: &AvHeader, input: &[u8], output: &mut [u8]) -> Result<()> {
    // Only the lossless mode is ever written (high bit of the first byte)
    if input.first().is_none_or(|&b| b & 0x80 == 0) {
        return Err(DecompressError::InvalidHeader("lossy AVHuff video is not supported"));
    }

    let mut reader = BitReader::new(input);
    reader.read(8);

    let mut ycontext = RleHuffmanDecoder::new(16);
    let mut cbcontext = RleHuffmanDecoder::new(16);
    let mut crcontext = RleHuffmanDecoder::new(16);
    ycontext.import_tree_rle(&mut reader)?;
    reader.flush();
    cbcontext.import_tree_rle(&mut reader)?;
    reader.flush();
    crcontext.import_tree_rle(&mut reader)?;
    reader.flush();
    ycontext.reset();
    cbcontext.reset();
    crcontext.reset();

    let stride = 2 * header.width;
    for row in output.chunks_exact_mut(stride) {
        let mut pixels = row.chunks_exact_mut(4);
        for pixel in &mut pixels {
            pixel[0] = ycontext.decode_one(&mut reader)?;
            pixel[1] = cbcontext.decode_one(&mut reader)?;
            pixel[2] = ycontext.decode_one(&mut reader)?;
            pixel[3] = crcontext.decode_one(&mut reader)?;
        }
        // Odd widths leave one unpaired pixel per row
        pixels.into_remainder().fill(0);
        ycontext.flush_rle();
        cbcontext.flush_rle();
        crcontext.flush_rle();
    }

    if reader.overflow() || reader.flush() != input.len() {
        return Err(DecompressError::InvalidHeader("video stream length mismatch"));
    }
    Ok(())
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::decompress::audio::testing::{encode, RawFrames};
    use crate::decompress::tests::{encode_tree_rle, pack_bits};

    /// Lossless video stream where each context knows deltas 0 and +1.
    pub(crate) fn video_stream(pixel_bits: &[(u32, u32)]) -> Vec<u8> {
        let mut lengths = vec![0u8; RleHuffmanDecoder::NUM_CODES];
        lengths[0] = 1;
        lengths[1] = 1;
        let tree = pack_bits(&encode_tree_rle(&lengths, 5));

        let mut stream = vec![0x80];
        for _ in 0..3 {
            stream.extend_from_slice(&tree);
        }
        stream.extend(pack_bits(pixel_bits));
        stream
    }

    pub(crate) fn block_header(channels: u8, samples: u16, width: u16, height: u16, tree: u16, sizes: &[u16]) -> Vec<u8> {
        let mut input = vec![0, channels];
        input.extend_from_slice(&samples.to_be_bytes());
        input.extend_from_slice(&width.to_be_bytes());
        input.extend_from_slice(&height.to_be_bytes());
        input.extend_from_slice(&tree.to_be_bytes());
        for size in sizes {
            input.extend_from_slice(&size.to_be_bytes());
        }
        input
    }

    #[test]
    fn test_raw_audio_and_lossless_video() {
        let mut input = block_header(1, 2, 2, 1, 0, &[4]);
        input.extend_from_slice(&[0x00, 0x10, 0xFF, 0xF0]);
        // Y +1, Cb +1, Y +1, Cr 0
        input.extend(video_stream(&[(1, 1), (1, 1), (1, 1), (0, 1)]));

        let mut output = [0xEEu8; 24];
        decode(&input, &mut output, None).unwrap();

        let mut expected = b"chav".to_vec();
        expected.extend_from_slice(&[0, 1, 0, 2, 0, 2, 0, 1]);
        expected.extend_from_slice(&[0x00, 0x10, 0x00, 0x00]);
        expected.extend_from_slice(&[1, 1, 2, 0]);
        expected.extend_from_slice(&[0; 4]);
        assert_eq!(output.to_vec(), expected);
    }

    #[test]
    fn test_huffman_audio() {
        let mut hi = vec![0u8; 256];
        hi[0x00] = 1;
        hi[0xFF] = 1;
        let mut lo = vec![0u8; 256];
        lo[0x05] = 1;
        lo[0x07] = 1;
        let mut trees = pack_bits(&encode_tree_rle(&hi, 5));
        trees.extend(pack_bits(&encode_tree_rle(&lo, 5)));

        // (hi 0x00, lo 0x05), (hi 0xFF, lo 0x07)
        let channel = pack_bits(&[(0, 1), (0, 1), (1, 1), (1, 1)]);

        let mut input = block_header(1, 2, 2, 1, trees.len() as u16, &[channel.len() as u16]);
        input.extend_from_slice(&trees);
        input.extend_from_slice(&channel);
        input.extend(video_stream(&[(0, 1), (0, 1), (0, 1), (0, 1)]));

        let mut output = [0u8; 20];
        decode(&input, &mut output, None).unwrap();

        let second = 5i16.wrapping_add(0xFF07u16 as i16);
        assert_eq!(output[12..14], 5i16.to_be_bytes());
        assert_eq!(output[14..16], second.to_be_bytes());
        assert_eq!(output[16..20], [0, 0, 0, 0]);
    }

    #[test]
    fn test_flac_audio_needs_decoder() {
        let flac = encode(&[0x0102, 0x0304]);
        let mut input = block_header(1, 2, 2, 1, 0xFFFF, &[flac.len() as u16]);
        input.extend_from_slice(&flac);
        input.extend(video_stream(&[(0, 1), (0, 1), (0, 1), (0, 1)]));

        let mut output = [0u8; 20];
        assert!(matches!(
            decode(&input, &mut output, None),
            Err(DecompressError::UnsupportedCodec(Codec::AVHUFF))
        ));

        let mut frames = RawFrames;
        decode(&input, &mut output, Some(&mut frames)).unwrap();
        assert_eq!(output[12..16], [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_odd_width_clears_row_tail() {
        let mut input = block_header(0, 0, 3, 2, 0, &[]);
        input.extend(video_stream(&[(0, 1); 8]));

        let mut output = [0xEEu8; 28];
        decode(&input, &mut output, None).unwrap();
        assert_eq!(output[12..], [0u8; 16]);
    }

    #[test]
    fn test_rejects_lossy_video() {
        let mut input = block_header(0, 0, 2, 1, 0, &[]);
        input.push(0x00);
        let mut output = [0u8; 16];
        assert!(decode(&input, &mut output, None).is_err());
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut input = block_header(0, 0, 64, 64, 0, &[]);
        input.push(0x80);
        let mut output = [0u8; 64];
        assert!(matches!(
            decode(&input, &mut output, None),
            Err(DecompressError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_trailing_video_bytes_rejected() {
        let mut input = block_header(0, 0, 2, 1, 0, &[]);
        input.extend(video_stream(&[(0, 1), (0, 1), (0, 1), (0, 1)]));
        input.push(0);
        let mut output = [0u8; 16];
        assert!(decode(&input, &mut output, None).is_err());
    }
}
