//! Map entry to backend dispatch.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::trace;

use super::audio::{self, AudioDecoderFactory, AudioFormat, AudioFrameDecoder};
use super::cdrom::{self, CdScratch, SectorCodec};
use super::{avhuff, BitReader, DecompressError, HuffmanDecoder, Inflater, LzmaDecoder};
use crate::cache::{self, DedupCache};
use crate::crc::{crc16, crc32};
use crate::error::{ChdError, ChecksumKind, Result};
use crate::file_media::FileMedia;
use crate::formats::Codec;
use crate::header::{BlockCompression, ChdHeader, MapEntry};
use crate::pool::BufferPool;
use crate::progress::Progress;

/// Backend state owned by one worker thread.
pub struct CodecState {
    inflater: Inflater,
    lzma: LzmaDecoder,
    cd: CdScratch,
    compressed: Vec<u8>,
    stereo: Option<Box<dyn AudioFrameDecoder>>,
    mono: Option<Box<dyn AudioFrameDecoder>>,
}

impl CodecState {
    /// State for a file whose slots hold `codecs`. Audio decoders are only
    /// created for the formats those slots can produce.
    pub fn new(block_size: u32, codecs: &[u32; 4], audio: Option<&dyn AudioDecoderFactory>) -> Self {
        let slots = || codecs.iter().filter_map(|&tag| Codec::from_tag(tag));
        let stereo = audio.filter(|_| slots().any(|codec| codec.needs_audio()));
        let mono = audio.filter(|_| slots().any(|codec| codec == Codec::AvHuff));
        Self {
            inflater: Inflater::new(),
            lzma: LzmaDecoder::chd(block_size),
            cd: CdScratch::default(),
            compressed: Vec::new(),
            stereo: stereo.map(|factory| factory.create(AudioFormat::CD_AUDIO)),
            mono: mono.map(|factory| factory.create(AudioFormat::AVHUFF_CHANNEL)),
        }
    }

    /// Run the backend for `tag` over `input`.
    fn decode(&mut self, tag: u32, input: &[u8], output: &mut [u8]) -> super::Result<()> {
        let codec = Codec::from_tag(tag).ok_or(DecompressError::UnsupportedCodec(tag))?;
        match codec {
            Codec::Zlib => {
                self.inflater.inflate(input, output)?;
                Ok(())
            }
            Codec::Lzma => self.lzma.decode(input, output),
            Codec::Huffman => decode_huffman(input, output),
            Codec::Flac => {
                let stereo = self
                    .stereo
                    .as_deref_mut()
                    .ok_or(DecompressError::UnsupportedCodec(tag))?;
                audio::decode_flac_block(stereo, input, output)
            }
            Codec::CdZlib => cdrom::decode(
                input,
                output,
                SectorCodec::Deflate,
                &mut self.inflater,
                &mut self.cd,
            ),
            Codec::CdLzma => cdrom::decode(
                input,
                output,
                SectorCodec::Lzma(&mut self.lzma),
                &mut self.inflater,
                &mut self.cd,
            ),
            Codec::CdFlac => {
                let stereo = self
                    .stereo
                    .as_deref_mut()
                    .ok_or(DecompressError::UnsupportedCodec(tag))?;
                cdrom::decode_flac(input, output, stereo, &mut self.inflater, &mut self.cd)
            }
            Codec::AvHuff => {
                let mono = self.mono.as_mut().map(|d| &mut **d as &mut dyn AudioFrameDecoder);
                avhuff::decode(input, output, mono)
            }
        }
    }
}

/// `huff` blocks: a Huffman-coded tree, then one code per output byte.
pub(super) fn decode_huffman(input: &[u8], output: &mut [u8]) -> super::Result<()> {
    let mut decoder = HuffmanDecoder::new(256, 16);
    let mut reader = BitReader::new(input);
    decoder.import_tree_huffman(&mut reader)?;
    for byte in output.iter_mut() {
        *byte = decoder.decode_one(&mut reader)? as u8;
    }
    if reader.overflow() {
        return Err(DecompressError::Overflow);
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "backend panicked".to_string()
    }
}

/// Produces decoded blocks for one CHD file.
///
/// Shared by all workers; per-thread state lives in [`CodecState`].
pub struct CodecDispatcher<'a> {
    header: &'a ChdHeader,
    media: &'a dyn FileMedia,
    cache: &'a DedupCache,
    pool: &'a BufferPool,
    progress: &'a Progress,
    audio: Option<Arc<dyn AudioDecoderFactory>>,
}

impl<'a> CodecDispatcher<'a> {
    pub fn new(
        header: &'a ChdHeader,
        media: &'a dyn FileMedia,
        cache: &'a DedupCache,
        pool: &'a BufferPool,
        progress: &'a Progress,
    ) -> Self {
        Self {
            header,
            media,
            cache,
            pool,
            progress,
            audio: None,
        }
    }

    pub fn with_audio(mut self, factory: Option<Arc<dyn AudioDecoderFactory>>) -> Self {
        self.audio = factory;
        self
    }

    pub fn pool(&self) -> &BufferPool {
        self.pool
    }

    /// Fresh backend state for a worker thread.
    pub fn new_state(&self) -> CodecState {
        CodecState::new(self.header.block_size, &self.header.codecs, self.audio.as_deref())
    }

    fn entry(&self, index: usize) -> Result<&MapEntry> {
        self.header
            .map
            .get(index)
            .ok_or_else(|| ChdError::InvalidMap(format!("block {index} is outside the map")))
    }

    fn check_output(&self, index: usize, out: &[u8]) -> Result<()> {
        if out.len() != self.header.block_size as usize {
            return Err(ChdError::CodecError {
                block: index,
                message: format!(
                    "output buffer is {} bytes, block size is {}",
                    out.len(),
                    self.header.block_size
                ),
            });
        }
        Ok(())
    }

    /// Fill `out` with block `index`.
    ///
    /// `SelfRef` entries resolve to their source. Blocks that are referenced
    /// elsewhere go through the dedup cache.
    pub fn read_block(&self, index: usize, out: &mut [u8], state: &mut CodecState) -> Result<()> {
        self.check_output(index, out)?;
        let entry = self.entry(index)?;
        let target = match entry.compression {
            BlockCompression::SelfRef => cache::resolve_source(self.header, index, entry.offset)?,
            _ => index,
        };

        let served = self
            .cache
            .read_through(target, out, self.pool, |out| self.decode_fresh(target, out, state))?;
        if served {
            self.progress.record_repeated();
        }
        trace!("block {index}: {:?} from {target}, cached={served}", entry.compression);
        Ok(())
    }

    /// Decode block `index` into `out` without the cache, verifying its
    /// checksums.
    pub fn decode_fresh(&self, index: usize, out: &mut [u8], state: &mut CodecState) -> Result<()> {
        self.check_output(index, out)?;
        let entry = *self.entry(index)?;

        match entry.compression {
            BlockCompression::None => {
                if entry.length as usize != out.len() {
                    return Err(ChdError::from_decompress(
                        index,
                        DecompressError::ShortOutput {
                            expected: out.len(),
                            actual: entry.length as usize,
                        },
                    ));
                }
                self.read_media(entry.offset, out)?;
            }
            BlockCompression::Mini => {
                let pattern = entry.offset.to_be_bytes();
                for chunk in out.chunks_mut(pattern.len()) {
                    chunk.copy_from_slice(&pattern[..chunk.len()]);
                }
            }
            BlockCompression::SelfRef => {
                let source = cache::resolve_source(self.header, index, entry.offset)?;
                return self.decode_fresh(source, out, state);
            }
            BlockCompression::Slot0
            | BlockCompression::Slot1
            | BlockCompression::Slot2
            | BlockCompression::Slot3 => {
                let slot = entry.compression.slot().unwrap_or_default();
                let tag = self.header.codecs[slot];
                self.decode_slot(index, &entry, tag, out, state)?;
            }
        }

        verify_checksums(index, &entry, out)
    }

    fn decode_slot(
        &self,
        index: usize,
        entry: &MapEntry,
        tag: u32,
        out: &mut [u8],
        state: &mut CodecState,
    ) -> Result<()> {
        let length = u64::from(entry.length);
        if entry.offset.checked_add(length).map_or(true, |end| end > self.media.len()) {
            return Err(ChdError::InvalidMap(format!(
                "block {index}: {length} compressed bytes at offset {} run past the end of the {} byte file",
                entry.offset,
                self.media.len()
            )));
        }

        let mut compressed = std::mem::take(&mut state.compressed);
        compressed.resize(entry.length as usize, 0);
        if let Err(err) = self.read_media(entry.offset, &mut compressed) {
            state.compressed = compressed;
            return Err(err);
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| state.decode(tag, &compressed, out)));
        state.compressed = compressed;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ChdError::from_decompress(index, err)),
            Err(payload) => {
                // The backend may be left half-updated; start over
                *state = self.new_state();
                Err(ChdError::CodecError {
                    block: index,
                    message: panic_message(payload.as_ref()),
                })
            }
        }
    }

    fn read_media(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.media
            .read_exact_at(offset, buf)
            .map_err(|source| ChdError::ReadError { offset, source })?;
        self.progress.record_read(buf.len() as u64);
        Ok(())
    }
}

fn verify_checksums(index: usize, entry: &MapEntry, data: &[u8]) -> Result<()> {
    if let Some(expected) = entry.crc32 {
        let actual = crc32(data);
        if actual != expected {
            return Err(ChdError::ChecksumMismatch {
                block: index,
                kind: ChecksumKind::Crc32,
                expected,
                actual,
            });
        }
    }
    if let Some(expected) = entry.crc16 {
        let actual = crc16(data);
        if actual != expected {
            return Err(ChdError::ChecksumMismatch {
                block: index,
                kind: ChecksumKind::Crc16,
                expected: expected as u32,
                actual: actual as u32,
            });
        }
    }
    Ok(())
}
