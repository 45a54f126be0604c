//! CHD block decompression.
//!
//! This module holds every codec backend a CHD block can be compressed
//! with, plus the dispatcher that maps a block's map entry onto one of them.
//!
//! ## Codecs
//!
//! | Tag | Backend | Notes |
//! |-----|---------|-------|
//! | `zlib` | [`Inflater`] | raw deflate, no zlib wrapper |
//! | `lzma` | [`LzmaDecoder`] | lc=3 lp=0 pb=2, dictionary = block size |
//! | `huff` | [`HuffmanDecoder`] | 256 symbols, tree imported with a secondary Huffman code |
//! | `flac` | [`AudioFrameDecoder`] | external, 16-bit stereo, leading `L`/`B` byte |
//! | `cdzl` | [`cdrom`] | deflate sectors + deflate subcode |
//! | `cdlz` | [`cdrom`] | LZMA sectors + deflate subcode |
//! | `cdfl` | [`cdrom`] | FLAC sectors + deflate subcode |
//! | `avhu` | [`avhuff`] | Huffman audio deltas + lossless YUY2 video |
//!
//! ## Architecture
//!
//! ```text
//! MapEntry
//!       ↓
//! ┌────────────────┐
//! │ CodecDispatcher│ ← None / Mini / SelfRef / Slot0..3
//! └────────────────┘
//!       ↓
//! ┌────────────────┐
//! │ DedupCache     │ ← serve repeated blocks, keep copies under budget
//! └────────────────┘
//!       ↓
//! ┌────────────────┐
//! │ Backend        │ ← deflate, LZMA, Huffman, CD frames, AVHuff
//! └────────────────┘
//!       ↓
//! ┌────────────────┐
//! │ CRC check      │ ← CRC-32 / CRC-16 on fresh decodes only
//! └────────────────┘
//!       ↓
//! block_size bytes
//! ```
//!
//! Backends are stateful but reusable: one [`CodecState`] is created per
//! worker thread and carried from block to block.

pub mod audio;
pub mod avhuff;
mod bit_reader;
pub mod cdrom;
mod deflate;
mod dispatch;
mod huffman;
pub mod lzma;


pub use audio::{AudioDecoderFactory, AudioFormat, AudioFrameDecoder};
pub use bit_reader::BitReader;
pub use deflate::Inflater;
pub use dispatch::{CodecDispatcher, CodecState};
pub use huffman::{HuffmanDecoder, RleHuffmanDecoder};
pub use lzma::{LzmaDecoder, LzmaProperties};

use thiserror::Error;

use crate::formats::tag_name;

/// Decompression errors.
///
/// Backends report these without block context; the dispatcher wraps them
/// into [`ChdError`](crate::ChdError) with the failing block index.
#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("Bit stream read past the end of its input")]
    Overflow,

    #[error("Invalid Huffman code")]
    InvalidHuffmanCode,

    #[error("Invalid Huffman tree: {0}")]
    InvalidHuffmanTree(&'static str),

    #[error("Invalid back reference: distance {distance} exceeds window position {position}")]
    InvalidBackReference { distance: u32, position: usize },

    #[error("Match continues {pending} bytes past the end of the output")]
    PendingCopy { pending: usize },

    #[error("Corrupt LZMA stream: {0}")]
    CorruptLzma(&'static str),

    #[error("Compressed length mismatch: consumed {consumed} of {expected} bytes")]
    InputLengthMismatch { expected: usize, consumed: usize },

    #[error("Short output: produced {actual} of {expected} bytes")]
    ShortOutput { expected: usize, actual: usize },

    #[error("Malformed block header: {0}")]
    InvalidHeader(&'static str),

    #[error("Deflate error: {0}")]
    Deflate(#[from] flate2::DecompressError),

    #[error("Unsupported codec {}", tag_name(*.0))]
    UnsupportedCodec(u32),

    #[error("Audio decoder error: {0}")]
    Audio(String),
}

pub type Result<T> = std::result::Result<T, DecompressError>;
