//! Error types for CHD decoding and verification.
//!
//! This module provides the [`ChdError`] type which covers all possible errors
//! that can occur while decoding blocks and verifying a CHD image.
//!
//! ## Error Categories
//!
//! | Category | Errors | Description |
//! |----------|--------|-------------|
//! | Invalid data | [`InvalidData`], [`InvalidMap`] | Malformed payload, size fields or block map |
//! | Decompression | [`ChecksumMismatch`], [`DigestMismatch`] | Decoded bytes fail a CRC or whole-file digest |
//! | Unsupported | [`UnsupportedFormat`] | A block names a codec this crate cannot decode |
//! | I/O | [`ReadError`], [`Io`] | Short or failed reads from the byte source |
//! | Codec | [`CodecError`] | A backend faulted unexpectedly |
//!
//! Every variant maps onto one [`ErrorKind`] via [`ChdError::kind`], so callers
//! can branch on the category without matching every variant.
//!
//! ## Example
//!
//! ```rust,ignore
//! use chd_verify::{ChdError, ErrorKind};
//!
//! match verifier.verify(&progress) {
//!     Ok(report) => println!("{} blocks ok", report.blocks),
//!     Err(ChdError::DigestMismatch(kind)) => eprintln!("{kind} digest differs"),
//!     Err(e) if e.kind() == ErrorKind::ReadError => eprintln!("truncated image: {e}"),
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! ```
//!
//! [`InvalidData`]: ChdError::InvalidData
//! [`InvalidMap`]: ChdError::InvalidMap
//! [`ChecksumMismatch`]: ChdError::ChecksumMismatch
//! [`DigestMismatch`]: ChdError::DigestMismatch
//! [`UnsupportedFormat`]: ChdError::UnsupportedFormat
//! [`ReadError`]: ChdError::ReadError
//! [`Io`]: ChdError::Io
//! [`CodecError`]: ChdError::CodecError

use std::fmt;
use std::io;

use thiserror::Error;

use crate::decompress::DecompressError;
use crate::formats::tag_name;

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed payload or size mismatch.
    InvalidData,
    /// Post-decode checksum or digest mismatch.
    DecompressionError,
    /// Unknown codec identifier.
    UnsupportedFormat,
    /// Short or failed read.
    ReadError,
    /// Unexpected backend fault.
    CodecError,
}

/// Per-block checksum flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumKind {
    Crc32,
    Crc16,
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crc32 => write!(f, "CRC-32"),
            Self::Crc16 => write!(f, "CRC-16"),
        }
    }
}

/// Whole-file digest flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestKind {
    Md5,
    Sha1,
}

impl fmt::Display for DigestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "MD5"),
            Self::Sha1 => write!(f, "SHA-1"),
        }
    }
}

/// Error type for CHD operations.
#[derive(Debug, Error)]
pub enum ChdError {
    /// A block's payload could not be decoded.
    ///
    /// The wrapped [`DecompressError`] says which backend rejected it.
    #[error("Block {block}: invalid data: {source}")]
    InvalidData {
        /// Index of the failing block.
        block: usize,
        source: DecompressError,
    },

    /// The block map violates a structural invariant (bad self reference,
    /// inconsistent sizes).
    #[error("Invalid block map: {0}")]
    InvalidMap(String),

    /// A freshly decoded block does not match its stored checksum.
    #[error("Block {block}: {kind} mismatch (expected {expected:#x}, got {actual:#x})")]
    ChecksumMismatch {
        block: usize,
        kind: ChecksumKind,
        expected: u32,
        actual: u32,
    },

    /// Every block decoded, but the whole-file digest differs.
    #[error("{0} digest mismatch")]
    DigestMismatch(DigestKind),

    /// A block is compressed with a codec this crate does not handle.
    #[error("Block {block}: unsupported codec {}", tag_name(*.tag))]
    UnsupportedFormat {
        block: usize,
        /// Four-character codec tag.
        tag: u32,
    },

    /// Reading compressed bytes from the source failed.
    #[error("Read error at offset {offset}: {source}")]
    ReadError { offset: u64, source: io::Error },

    /// A backend faulted in a way that is not a property of the data.
    #[error("Block {block}: codec fault: {message}")]
    CodecError { block: usize, message: String },

    /// An I/O error occurred outside block reads.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ChdError {
    /// The error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidData { .. } | Self::InvalidMap(_) => ErrorKind::InvalidData,
            Self::ChecksumMismatch { .. } | Self::DigestMismatch(_) => {
                ErrorKind::DecompressionError
            }
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::ReadError { .. } | Self::Io(_) => ErrorKind::ReadError,
            Self::CodecError { .. } => ErrorKind::CodecError,
        }
    }

    /// Attach block context to a backend error.
    pub fn from_decompress(block: usize, err: DecompressError) -> Self {
        match err {
            DecompressError::UnsupportedCodec(tag) => Self::UnsupportedFormat { block, tag },
            DecompressError::Audio(message) => Self::CodecError { block, message },
            source => Self::InvalidData { block, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, ChdError>;
