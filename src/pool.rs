//! Recycled block-sized decode buffers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub rented: u64,
    pub released: u64,
    pub allocated: u64,
    pub idle: usize,
}

/// A free list of equally sized buffers.
///
/// `rent` never blocks: it pops an idle buffer or allocates a zeroed one.
/// Buffers handed back beyond `max_idle` are dropped.
#[derive(Debug)]
pub struct BufferPool {
    buffer_len: usize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
    rented: AtomicU64,
    released: AtomicU64,
    allocated: AtomicU64,
}

impl BufferPool {
    pub fn new(buffer_len: usize, max_idle: usize) -> Self {
        Self {
            buffer_len,
            max_idle,
            idle: Mutex::new(Vec::new()),
            rented: AtomicU64::new(0),
            released: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    fn idle(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        // A poisoned free list still holds valid buffers
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn rent(&self) -> Vec<u8> {
        self.rented.fetch_add(1, Ordering::Relaxed);
        if let Some(buf) = self.idle().pop() {
            return buf;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        vec![0u8; self.buffer_len]
    }

    pub fn release(&self, buf: Vec<u8>) {
        self.released.fetch_add(1, Ordering::Relaxed);
        if buf.len() != self.buffer_len {
            return;
        }
        let mut idle = self.idle();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            rented: self.rented.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            idle: self.idle().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuses_released_buffers() {
        let pool = BufferPool::new(16, 4);
        let mut buf = pool.rent();
        assert_eq!(buf.len(), 16);
        buf[0] = 0xAB;
        pool.release(buf);

        let buf = pool.rent();
        assert_eq!(buf[0], 0xAB);
        let stats = pool.stats();
        assert_eq!(stats.rented, 2);
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.idle, 0);
        pool.release(buf);
    }

    #[test]
    fn test_idle_cap() {
        let pool = BufferPool::new(8, 2);
        let bufs: Vec<_> = (0..5).map(|_| pool.rent()).collect();
        for buf in bufs {
            pool.release(buf);
        }
        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.released, 5);
    }

    #[test]
    fn test_wrong_size_dropped() {
        let pool = BufferPool::new(8, 2);
        pool.release(vec![0u8; 3]);
        assert_eq!(pool.stats().idle, 0);
    }
}
