//! Deduplication cache for blocks that other blocks refer to.
//!
//! CHD stores repeated content once and points later blocks at it with
//! `SelfRef` entries. A pre-pass counts how often each block is referenced;
//! the first decode of such a block keeps a copy, every later read is served
//! from it, and the copy is dropped after its last reference.
//!
//! All cached copies share one byte budget. Blocks that do not fit are simply
//! decoded again.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::debug;
use rayon::prelude::*;

use crate::decompress::CodecDispatcher;
use crate::error::{ChdError, Result};
use crate::header::ChdHeader;
use crate::pool::BufferPool;

#[derive(Debug, Default)]
struct CacheSlot {
    uses: AtomicU32,
    cached: Mutex<Option<Vec<u8>>>,
}

impl CacheSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-block use counts and cached copies.
#[derive(Debug)]
pub struct DedupCache {
    slots: Vec<CacheSlot>,
    block_size: u64,
    budget: u64,
    reserved: AtomicU64,
    served: AtomicU64,
}

impl DedupCache {
    pub fn new(block_count: usize, block_size: u32, budget: u64) -> Self {
        Self {
            slots: (0..block_count).map(|_| CacheSlot::default()).collect(),
            block_size: block_size as u64,
            budget,
            reserved: AtomicU64::new(0),
            served: AtomicU64::new(0),
        }
    }

    /// Count the references to every block.
    ///
    /// Fails if a `SelfRef` points outside the map or at another `SelfRef`.
    /// Returns the number of `SelfRef` entries.
    pub fn find_repeated_blocks(&self, header: &ChdHeader) -> Result<usize> {
        let found = header
            .map
            .par_iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_self_ref())
            .try_fold(
                || 0usize,
                |found, (index, entry)| {
                    let source = resolve_source(header, index, entry.offset)?;
                    self.slots[source].uses.fetch_add(1, Ordering::Relaxed);
                    Ok::<_, ChdError>(found + 1)
                },
            )
            .try_reduce(|| 0, |a, b| Ok(a + b))?;

        debug!("found {found} self-referencing blocks in {} entries", header.map.len());
        Ok(found)
    }

    /// Remaining references to block `index`.
    pub fn use_count(&self, index: usize) -> u32 {
        self.slots
            .get(index)
            .map_or(0, |slot| slot.uses.load(Ordering::Acquire))
    }

    /// Whether a decoded copy of block `index` is held.
    pub fn is_cached(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|slot| slot.lock().is_some())
    }

    /// Bytes currently reserved by cached copies.
    pub fn reserved_bytes(&self) -> u64 {
        self.reserved.load(Ordering::Acquire)
    }

    /// Reads served from a cached copy so far.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    fn try_reserve(&self) -> bool {
        let block = self.block_size;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(block).filter(|&total| total <= self.budget)
            })
            .is_ok()
    }

    fn unreserve(&self) {
        self.reserved.fetch_sub(self.block_size, Ordering::AcqRel);
    }

    /// Decode the most referenced blocks ahead of the main pass.
    ///
    /// Candidates are ordered by use count, highest first, and taken until
    /// the budget runs out. Returns the number of blocks installed.
    pub fn preload(&self, dispatcher: &CodecDispatcher<'_>) -> Result<usize> {
        let mut candidates: Vec<(usize, u32)> = (0..self.slots.len())
            .map(|index| (index, self.use_count(index)))
            .filter(|&(_, uses)| uses > 0)
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut selected = Vec::with_capacity(candidates.len());
        for &(index, _) in &candidates {
            if !self.try_reserve() {
                break;
            }
            selected.push(index);
        }
        debug!(
            "preloading {} of {} repeated blocks ({} bytes reserved)",
            selected.len(),
            candidates.len(),
            self.reserved_bytes()
        );

        let pool = dispatcher.pool();
        selected.par_iter().try_for_each_init(
            || dispatcher.new_state(),
            |state, &index| {
                let mut buf = pool.rent();
                if let Err(err) = dispatcher.decode_fresh(index, &mut buf, state) {
                    pool.release(buf);
                    self.unreserve();
                    return Err(err);
                }
                *self.slots[index].lock() = Some(buf);
                Ok(())
            },
        )?;
        Ok(selected.len())
    }

    /// Fill `out` with block `index`, from the cache when possible.
    ///
    /// `decode` produces a fresh, checksum-verified copy. A cached copy is
    /// returned without checking; its last reader hands the buffer back to
    /// `pool`. Returns `true` when the read was served from the cache.
    pub fn read_through<F>(
        &self,
        index: usize,
        out: &mut [u8],
        pool: &BufferPool,
        decode: F,
    ) -> Result<bool>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        let slot = self
            .slots
            .get(index)
            .ok_or_else(|| ChdError::InvalidMap(format!("block {index} is outside the map")))?;
        let mut cached = slot.lock();

        if let Some(buf) = cached.as_ref() {
            out.copy_from_slice(buf);
            self.served.fetch_add(1, Ordering::Relaxed);
            if slot.uses.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Some(buf) = cached.take() {
                    pool.release(buf);
                }
                self.unreserve();
            }
            return Ok(true);
        }

        decode(out)?;
        if slot.uses.load(Ordering::Acquire) > 0 && self.try_reserve() {
            let mut copy = pool.rent();
            copy.copy_from_slice(out);
            *cached = Some(copy);
        }
        Ok(false)
    }
}

/// Validate the source of the `SelfRef` at `index`.
pub(crate) fn resolve_source(header: &ChdHeader, index: usize, offset: u64) -> Result<usize> {
    let source = usize::try_from(offset)
        .ok()
        .filter(|&source| source < header.map.len())
        .ok_or_else(|| {
            ChdError::InvalidMap(format!("block {index} refers to missing block {offset}"))
        })?;
    if header.map[source].is_self_ref() {
        return Err(ChdError::InvalidMap(format!(
            "block {index} refers to block {source}, which is itself a reference"
        )));
    }
    Ok(source)
}
