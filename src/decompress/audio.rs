//! Seam for the external FLAC frame decoder.
//!
//! FLAC itself is not decoded by this crate. Callers that need the `flac`,
//! `cdfl` or AVHuff-FLAC paths plug in an [`AudioDecoderFactory`] through
//! [`VerifyOptions::with_audio`](crate::VerifyOptions::with_audio); without
//! one those blocks fail as unsupported.

use super::{DecompressError, Result};

/// PCM layout an audio decoder is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub bits_per_sample: u8,
    pub channels: u8,
    pub sample_rate: u32,
}

impl AudioFormat {
    /// `flac` and `cdfl` blocks: CD audio.
    pub const CD_AUDIO: Self = Self {
        bits_per_sample: 16,
        channels: 2,
        sample_rate: 44_100,
    };

    /// FLAC-coded AVHuff audio channels.
    pub const AVHUFF_CHANNEL: Self = Self {
        bits_per_sample: 16,
        channels: 1,
        sample_rate: 48_000,
    };
}

/// Decodes one frame at a time.
pub trait AudioFrameDecoder: Send {
    /// Decode one frame from the start of `input`.
    ///
    /// Decoded samples (interleaved by channel) are appended to `samples`.
    /// Returns the number of input bytes the frame occupied; `0` means no
    /// further frame could be found.
    fn decode_frame(&mut self, input: &[u8], samples: &mut Vec<i16>) -> Result<usize>;
}

/// Creates frame decoders, one per worker thread and format.
pub trait AudioDecoderFactory: Send + Sync {
    fn create(&self, format: AudioFormat) -> Box<dyn AudioFrameDecoder>;
}

/// Decode frames until `output` is full of 16-bit PCM.
///
/// Samples are written big- or little-endian as requested. Returns the
/// number of input bytes consumed by the frames used.
pub fn decode_pcm(
    decoder: &mut dyn AudioFrameDecoder,
    input: &[u8],
    output: &mut [u8],
    big_endian: bool,
) -> Result<usize> {
    let mut samples = Vec::new();
    let mut src = 0;
    let mut dst = 0;

    while dst < output.len() {
        samples.clear();
        let read = decoder.decode_frame(&input[src..], &mut samples)?;
        if read == 0 {
            break;
        }
        if read > input.len() - src {
            return Err(DecompressError::Audio(format!(
                "frame claims {read} bytes with {} remaining",
                input.len() - src
            )));
        }
        src += read;

        for sample in &samples {
            if dst + 2 > output.len() {
                break;
            }
            let bytes = if big_endian {
                sample.to_be_bytes()
            } else {
                sample.to_le_bytes()
            };
            output[dst..dst + 2].copy_from_slice(&bytes);
            dst += 2;
        }
    }

    if dst != output.len() {
        return Err(DecompressError::ShortOutput {
            expected: output.len(),
            actual: dst,
        });
    }
    Ok(src)
}

/// Decode a `flac` block: one byte naming the output byte order (`L` or
/// `B`), then FLAC frames.
pub fn decode_flac_block(
    decoder: &mut dyn AudioFrameDecoder,
    input: &[u8],
    output: &mut [u8],
) -> Result<()> {
    let big_endian = match input.first() {
        Some(b'L') => false,
        Some(b'B') => true,
        _ => return Err(DecompressError::InvalidHeader("FLAC block must start with 'L' or 'B'")),
    };
    decode_pcm(decoder, &input[1..], output, big_endian)?;
    Ok(())
}
