//! CHD (Compressed Hunks of Data) decoding and verification.
//!
//! Decodes every block of a CHD image in parallel and checks per-block
//! CRCs and the whole-file MD5 / SHA-1 digests, folding blocks into the
//! digests in their original order.
//!
//! Header parsing is the caller's job: build a [`ChdHeader`] from the
//! on-disk layout, wrap the file in a [`FileMedia`] and hand both to a
//! [`Verifier`].
//!
//! ## Features
//! - Hand-built LZMA and MAME Huffman decoders, raw deflate through `flate2`
//! - CD-ROM frame reassembly with sync and P/Q ECC regeneration
//! - AVHuff audio and lossless video blocks
//! - Deduplication cache for self-referencing blocks, under one byte budget
//! - FLAC through a pluggable [`AudioDecoderFactory`]
//!
//! ```no_run
//! use chd_verify::{ChdHeader, LocalFileMedia, Progress, Verifier, VerifyOptions};
//!
//! # fn header_from_disk() -> ChdHeader { ChdHeader::default() }
//! let header = header_from_disk();
//! let media = LocalFileMedia::open("game.chd")?;
//! let report = Verifier::new(&header, &media, VerifyOptions::default()).verify(&Progress::new())?;
//! println!("{} blocks ok", report.blocks);
//! # Ok::<(), chd_verify::ChdError>(())
//! ```

pub mod cache;
pub mod crc;
pub mod decompress;
pub mod error;
mod file_media;
pub mod formats;
pub mod header;
mod options;
pub mod pipeline;
pub mod pool;
mod progress;

pub use error::{ChdError, ChecksumKind, DigestKind, ErrorKind, Result};
pub use file_media::{FileMedia, LocalFileMedia, StreamMedia};
pub use header::{BlockCompression, ChdHeader, MapEntry};
pub use options::VerifyOptions;
pub use pipeline::{Verifier, VerifyReport};
pub use progress::{Progress, ProgressSnapshot};

// Re-export decompression types
pub use decompress::{AudioDecoderFactory, AudioFormat, AudioFrameDecoder, DecompressError};
pub use formats::Codec;
