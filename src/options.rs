//! Verification options.

use std::fmt;
use std::sync::Arc;

use crate::decompress::AudioDecoderFactory;

/// Options for [`Verifier`](crate::Verifier).
#[derive(Clone)]
pub struct VerifyOptions {
    /// Decode threads. `0` uses one per CPU.
    pub workers: usize,
    /// Queue slots per worker between pipeline stages.
    pub queue_depth: usize,
    /// Bytes of decoded blocks the dedup cache may hold.
    pub cache_budget: u64,
    /// Idle buffers kept by the buffer pool.
    pub pool_max_idle: usize,
    /// Decode repeated blocks before the main pass.
    pub preload: bool,
    /// FLAC frame decoder for `flac`, `cdfl` and FLAC AVHuff blocks.
    pub audio: Option<Arc<dyn AudioDecoderFactory>>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_depth: 5,
            cache_budget: 1 << 30,
            pool_max_idle: 256,
            preload: true,
            audio: None,
        }
    }
}

impl fmt::Debug for VerifyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyOptions")
            .field("workers", &self.workers)
            .field("queue_depth", &self.queue_depth)
            .field("cache_budget", &self.cache_budget)
            .field("pool_max_idle", &self.pool_max_idle)
            .field("preload", &self.preload)
            .field("audio", &self.audio.is_some())
            .finish()
    }
}

impl VerifyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_cache_budget(mut self, bytes: u64) -> Self {
        self.cache_budget = bytes;
        self
    }

    pub fn with_pool_max_idle(mut self, max_idle: usize) -> Self {
        self.pool_max_idle = max_idle;
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub fn with_audio(mut self, factory: Arc<dyn AudioDecoderFactory>) -> Self {
        self.audio = Some(factory);
        self
    }

    /// Worker count with `0` resolved.
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Capacity of each pipeline queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_depth.max(1) * self.effective_workers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = VerifyOptions::default();
        assert_eq!(opts.queue_depth, 5);
        assert_eq!(opts.cache_budget, 1024 * 1024 * 1024);
        assert!(opts.preload);
        assert!(opts.effective_workers() >= 1);
    }

    #[test]
    fn test_builder() {
        let opts = VerifyOptions::new()
            .with_workers(3)
            .with_queue_depth(2)
            .with_cache_budget(0)
            .with_preload(false);
        assert_eq!(opts.effective_workers(), 3);
        assert_eq!(opts.queue_capacity(), 6);
        assert_eq!(opts.cache_budget, 0);
        assert!(!opts.preload);
        assert!(format!("{opts:?}").contains("audio: false"));
    }
}
