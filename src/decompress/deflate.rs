//! Raw deflate backend.
//!
//! CHD's `zlib` codec stores bare deflate streams (no zlib header or
//! Adler-32 trailer). The CD codecs use the same backend for the subcode
//! stream and, for `cdzl`, the sector stream.

use flate2::{Decompress, FlushDecompress, Status};

use super::{DecompressError, Result};

/// Reusable raw-deflate decoder.
pub struct Inflater {
    inner: Decompress,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(false),
        }
    }

    /// Inflate `input` until `output` is full.
    ///
    /// Returns the number of input bytes consumed. Running out of input
    /// before the output is full is an error.
    pub fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        self.inner.reset(false);

        while (self.inner.total_out() as usize) < output.len() {
            let in_pos = self.inner.total_in() as usize;
            let out_pos = self.inner.total_out() as usize;
            let status = self.inner.decompress(
                &input[in_pos..],
                &mut output[out_pos..],
                FlushDecompress::Finish,
            )?;

            let progressed = self.inner.total_in() as usize != in_pos
                || self.inner.total_out() as usize != out_pos;
            if status == Status::StreamEnd || !progressed {
                break;
            }
        }

        let produced = self.inner.total_out() as usize;
        if produced != output.len() {
            return Err(DecompressError::ShortOutput {
                expected: output.len(),
                actual: produced,
            });
        }
        Ok(self.inner.total_in() as usize)
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}
