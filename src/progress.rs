//! Verification progress counters.
//!
//! A [`Progress`] is passed by reference into the pipeline and updated with
//! relaxed atomics from every thread; a reporter can poll [`Progress::snapshot`]
//! concurrently.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Progress {
    compressed_bytes: AtomicU64,
    blocks_verified: AtomicU64,
    bytes_verified: AtomicU64,
    repeated_blocks: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Compressed bytes read from the source.
    pub compressed_bytes: u64,
    pub blocks_verified: u64,
    /// Decoded bytes folded into the digests.
    pub bytes_verified: u64,
    /// Blocks served from the dedup cache.
    pub repeated_blocks: u64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, bytes: u64) {
        self.compressed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_verified(&self, bytes: u64) {
        self.blocks_verified.fetch_add(1, Ordering::Relaxed);
        self.bytes_verified.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_repeated(&self) {
        self.repeated_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            compressed_bytes: self.compressed_bytes.load(Ordering::Relaxed),
            blocks_verified: self.blocks_verified.load(Ordering::Relaxed),
            bytes_verified: self.bytes_verified.load(Ordering::Relaxed),
            repeated_blocks: self.repeated_blocks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let progress = Progress::new();
        progress.record_read(100);
        progress.record_verified(4096);
        progress.record_verified(10);
        progress.record_repeated();

        let snap = progress.snapshot();
        assert_eq!(snap.compressed_bytes, 100);
        assert_eq!(snap.blocks_verified, 2);
        assert_eq!(snap.bytes_verified, 4106);
        assert_eq!(snap.repeated_blocks, 1);
    }
}
