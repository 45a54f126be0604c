//! Parallel decode and in-order verification of a whole CHD file.
//!
//! ```text
//!  producer ──indices──▶ workers (N) ──(index, block)──▶ cleanup
//!                         │                               │
//!                    CodecDispatcher              MD5 + SHA-1 in
//!                    + DedupCache                 index order
//! ```
//!
//! Both queues are bounded. Workers finish blocks in any order; the cleanup
//! stage on the calling thread parks early arrivals until every lower index
//! has been folded into the digests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::cache::DedupCache;
use crate::decompress::CodecDispatcher;
use crate::error::{ChdError, DigestKind, Result};
use crate::file_media::FileMedia;
use crate::header::ChdHeader;
use crate::options::VerifyOptions;
use crate::pool::BufferPool;
use crate::progress::Progress;

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub blocks: usize,
    /// Decoded bytes folded into the digests.
    pub bytes: u64,
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    /// `SelfRef` entries in the map.
    pub self_refs: usize,
    /// Blocks decoded ahead of the main pass.
    pub preloaded: usize,
    /// Reads served from the dedup cache.
    pub repeated_blocks: u64,
}

enum Completion {
    Block(usize, Vec<u8>),
    Failed,
}

/// Shared failure state: the first error wins.
#[derive(Default)]
struct Failure {
    flag: AtomicBool,
    first: Mutex<Option<ChdError>>,
}

impl Failure {
    fn record(&self, err: ChdError) {
        let mut first = self.first.lock().unwrap_or_else(|p| p.into_inner());
        if first.is_none() {
            warn!("verification failed: {err}");
            *first = Some(err);
        }
        self.flag.store(true, Ordering::Release);
    }

    fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<ChdError> {
        self.first.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

/// Decodes and verifies every block of one CHD file.
pub struct Verifier<'a> {
    header: &'a ChdHeader,
    media: &'a dyn FileMedia,
    options: VerifyOptions,
}

impl<'a> Verifier<'a> {
    pub fn new(header: &'a ChdHeader, media: &'a dyn FileMedia, options: VerifyOptions) -> Self {
        Self {
            header,
            media,
            options,
        }
    }

    /// Verify the file, updating `progress` as blocks complete.
    pub fn verify(&self, progress: &Progress) -> Result<VerifyReport> {
        self.verify_with(progress, |_, _| {})
    }

    /// Like [`verify`](Self::verify), handing every block to `observer` in
    /// index order. The last block is clipped to the logical size.
    pub fn verify_with<F>(&self, progress: &Progress, observer: F) -> Result<VerifyReport>
    where
        F: FnMut(usize, &[u8]),
    {
        let header = self.header;
        header.validate()?;

        let block_count = header.block_count();
        let cache = DedupCache::new(block_count, header.block_size, self.options.cache_budget);
        let pool = BufferPool::new(header.block_size as usize, self.options.pool_max_idle);
        let dispatcher = CodecDispatcher::new(header, self.media, &cache, &pool, progress)
            .with_audio(self.options.audio.clone());

        let self_refs = cache.find_repeated_blocks(header)?;
        let preloaded = if self.options.preload && self_refs > 0 {
            cache.preload(&dispatcher)?
        } else {
            0
        };

        let workers = self.options.effective_workers();
        debug!(
            "verifying {block_count} blocks of {} bytes with {workers} workers",
            header.block_size
        );

        let (md5, sha1) = self.run(&dispatcher, progress, workers, observer)?;

        let stats = pool.stats();
        debug!(
            "pool: {} rented, {} released, {} allocated, {} idle",
            stats.rented, stats.released, stats.allocated, stats.idle
        );

        if header.md5.is_some_and(|expected| expected != md5) {
            return Err(ChdError::DigestMismatch(DigestKind::Md5));
        }
        if header.raw_sha1.is_some_and(|expected| expected != sha1) {
            return Err(ChdError::DigestMismatch(DigestKind::Sha1));
        }

        let report = VerifyReport {
            blocks: block_count,
            bytes: header.total_bytes,
            md5,
            sha1,
            self_refs,
            preloaded,
            repeated_blocks: cache.served(),
        };
        debug!("verified {} blocks, {} bytes", report.blocks, report.bytes);
        Ok(report)
    }

    fn run<F>(
        &self,
        dispatcher: &CodecDispatcher<'_>,
        progress: &Progress,
        workers: usize,
        observer: F,
    ) -> Result<([u8; 16], [u8; 20])>
    where
        F: FnMut(usize, &[u8]),
    {
        let capacity = self.options.queue_capacity();
        let (work_tx, work_rx) = bounded::<Option<usize>>(capacity);
        let (done_tx, done_rx) = bounded::<Completion>(capacity);
        let failure = Failure::default();
        let block_count = self.header.block_count();

        let digests = thread::scope(|scope| {
            let failure = &failure;
            scope.spawn(move || produce(work_tx, block_count, workers, failure));
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || decode_worker(dispatcher, work_rx, done_tx, failure));
            }
            drop(work_rx);
            drop(done_tx);

            self.cleanup(done_rx, dispatcher.pool(), progress, observer)
        });

        if let Some(err) = failure.take() {
            return Err(err);
        }
        digests.ok_or_else(|| ChdError::CodecError {
            block: block_count,
            message: "pipeline stopped before the last block".into(),
        })
    }

    /// Fold completed blocks into the digests in index order.
    ///
    /// Returns `None` if the pipeline stopped before every block arrived.
    fn cleanup<F>(
        &self,
        done_rx: Receiver<Completion>,
        pool: &BufferPool,
        progress: &Progress,
        mut observer: F,
    ) -> Option<([u8; 16], [u8; 20])>
    where
        F: FnMut(usize, &[u8]),
    {
        let block_count = self.header.block_count();
        let mut pending: HashMap<usize, Vec<u8>> = HashMap::new();
        let mut next = 0;
        let mut md5 = Md5::new();
        let mut sha1 = Sha1::new();

        while next < block_count {
            let Ok(Completion::Block(index, buf)) = done_rx.recv() else {
                break;
            };
            pending.insert(index, buf);

            while let Some(buf) = pending.remove(&next) {
                let data = &buf[..self.header.block_len(next)];
                md5.update(data);
                sha1.update(data);
                observer(next, data);
                progress.record_verified(data.len() as u64);
                pool.release(buf);
                next += 1;
            }
        }

        for buf in pending.into_values() {
            pool.release(buf);
        }
        // Unblock workers still trying to hand off blocks
        drop(done_rx);

        (next == block_count).then(|| (md5.finalize().into(), sha1.finalize().into()))
    }
}

fn produce(work_tx: Sender<Option<usize>>, block_count: usize, workers: usize, failure: &Failure) {
    for index in 0..block_count {
        if failure.is_set() || work_tx.send(Some(index)).is_err() {
            return;
        }
    }
    for _ in 0..workers {
        if work_tx.send(None).is_err() {
            return;
        }
    }
}

fn decode_worker(
    dispatcher: &CodecDispatcher<'_>,
    work_rx: Receiver<Option<usize>>,
    done_tx: Sender<Completion>,
    failure: &Failure,
) {
    let mut state = dispatcher.new_state();
    let pool = dispatcher.pool();

    while let Ok(Some(index)) = work_rx.recv() {
        if failure.is_set() {
            return;
        }
        let mut buf = pool.rent();
        match dispatcher.read_block(index, &mut buf, &mut state) {
            Ok(()) => {
                if let Err(returned) = done_tx.send(Completion::Block(index, buf)) {
                    if let Completion::Block(_, buf) = returned.into_inner() {
                        pool.release(buf);
                    }
                    return;
                }
            }
            Err(err) => {
                pool.release(buf);
                failure.record(err);
                let _ = done_tx.send(Completion::Failed);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::{crc16, crc32};
    use crate::decompress::audio::testing::{encode, RawFramesFactory};
    use crate::error::ErrorKind;
    use crate::formats::Codec;
    use crate::header::{BlockCompression, MapEntry};
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::{self, Write};
    use std::sync::Arc;
    use std::time::Duration;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn digests(data: &[u8]) -> ([u8; 16], [u8; 20]) {
        (Md5::digest(data).into(), Sha1::digest(data).into())
    }

    /// `[raw "AAAA", deflate("BBBB"), Self→0, Mini]`, block size 4.
    fn mixed_file() -> (ChdHeader, Vec<u8>, Vec<u8>) {
        let mut media = b"AAAA".to_vec();
        let compressed = deflate(b"BBBB");
        media.extend_from_slice(&compressed);

        let mut header = ChdHeader::new(
            4,
            16,
            vec![
                MapEntry::raw(0, 4).with_crc32(crc32(b"AAAA")),
                MapEntry::compressed(BlockCompression::Slot0, 4, compressed.len() as u32)
                    .with_crc32(crc32(b"BBBB"))
                    .with_crc16(crc16(b"BBBB")),
                MapEntry::self_ref(0),
                MapEntry::mini(0x1122_3344_5566_7788),
            ],
        );
        header.codecs[0] = Codec::ZLIB;

        let expected = [&b"AAAA"[..], b"BBBB", b"AAAA", &[0x11u8, 0x22, 0x33, 0x44][..]].concat();
        (header, media, expected)
    }

    #[test]
    fn test_mixed_file() {
        let (mut header, media, expected) = mixed_file();
        let (md5, sha1) = digests(&expected);
        header.md5 = Some(md5);
        header.raw_sha1 = Some(sha1);

        for workers in [1, 4] {
            let progress = Progress::new();
            let mut decoded = Vec::new();
            let report = Verifier::new(&header, &media, VerifyOptions::new().with_workers(workers))
                .verify_with(&progress, |_, data| decoded.extend_from_slice(data))
                .unwrap();

            assert_eq!(decoded, expected);
            assert_eq!(report.md5, md5);
            assert_eq!(report.sha1, sha1);
            assert_eq!(report.blocks, 4);
            assert_eq!(report.self_refs, 1);
            assert_eq!(report.repeated_blocks, 1);

            let snap = progress.snapshot();
            assert_eq!(snap.blocks_verified, 4);
            assert_eq!(snap.bytes_verified, 16);
        }
    }

    #[test]
    fn test_wrong_md5_with_correct_crcs() {
        let (mut header, media, expected) = mixed_file();
        let (md5, sha1) = digests(&expected);
        header.md5 = Some([0u8; 16]);
        header.raw_sha1 = Some(sha1);
        let err = Verifier::new(&header, &media, VerifyOptions::new().with_workers(2))
            .verify(&Progress::new())
            .unwrap_err();
        assert!(matches!(err, ChdError::DigestMismatch(DigestKind::Md5)));
        assert_eq!(err.kind(), ErrorKind::DecompressionError);

        header.md5 = Some(md5);
        header.raw_sha1 = Some([0u8; 20]);
        let err = Verifier::new(&header, &media, VerifyOptions::new())
            .verify(&Progress::new())
            .unwrap_err();
        assert!(matches!(err, ChdError::DigestMismatch(DigestKind::Sha1)));
    }

    #[test]
    fn test_empty_file() {
        let header = ChdHeader::new(4, 0, Vec::new());
        let report = Verifier::new(&header, &Vec::<u8>::new(), VerifyOptions::new())
            .verify(&Progress::new())
            .unwrap();
        assert_eq!(report.blocks, 0);
        assert_eq!(hex::encode(report.md5), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_short_last_block_clipped() {
        let media = b"0123456789ab".to_vec();
        let header = ChdHeader::new(4, 10, vec![MapEntry::raw(0, 4), MapEntry::raw(4, 4), MapEntry::raw(8, 4)]);
        let report = Verifier::new(&header, &media, VerifyOptions::new().with_workers(2))
            .verify(&Progress::new())
            .unwrap();
        assert_eq!(report.md5, digests(b"0123456789").0);
        assert_eq!(report.bytes, 10);
    }

    /// Media that sleeps a varying time per read.
    struct SlowMedia(Vec<u8>);

    impl FileMedia for SlowMedia {
        fn len(&self) -> u64 {
            self.0.len() as u64
        }

        fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
            let jitter = (offset.wrapping_mul(2_654_435_761) >> 7) % 4;
            thread::sleep(Duration::from_millis(jitter));
            self.0.read_exact_at(offset, buf)
        }
    }

    #[test]
    fn test_digest_order_with_jittered_reads() {
        let block_count = 48;
        let data: Vec<u8> = (0..block_count * 16).map(|i| (i * 31 % 253) as u8).collect();
        let map = (0..block_count)
            .map(|i| MapEntry::raw(i as u64 * 16, 16).with_crc32(crc32(&data[i * 16..(i + 1) * 16])))
            .collect();
        let mut header = ChdHeader::new(16, data.len() as u64, map);
        header.md5 = Some(digests(&data).0);

        let media = SlowMedia(data);
        let mut order = Vec::new();
        Verifier::new(&header, &media, VerifyOptions::new().with_workers(6).with_queue_depth(2))
            .verify_with(&Progress::new(), |index, _| order.push(index))
            .unwrap();
        assert_eq!(order, (0..block_count).collect::<Vec<_>>());
    }

    /// One deflate block referenced by many `SelfRef` entries.
    fn referenced_file(refs: usize) -> (ChdHeader, Vec<u8>) {
        let block = b"0123456789abcdef";
        let compressed = deflate(block);
        let mut map = vec![MapEntry::compressed(BlockCompression::Slot0, 0, compressed.len() as u32)
            .with_crc32(crc32(block))];
        map.extend((0..refs).map(|_| MapEntry::self_ref(0)));
        let mut header = ChdHeader::new(16, 16 * (refs as u64 + 1), map);
        header.codecs[0] = Codec::ZLIB;
        header.md5 = Some(digests(&block.repeat(refs + 1)).0);
        (header, compressed)
    }

    #[test]
    fn test_use_count_conservation() {
        let (header, media) = referenced_file(10);
        for preload in [true, false] {
            let progress = Progress::new();
            let report = Verifier::new(
                &header,
                &media,
                VerifyOptions::new().with_workers(4).with_preload(preload),
            )
            .verify(&progress)
            .unwrap();
            assert_eq!(report.self_refs, 10);
            assert_eq!(report.repeated_blocks, 10);
            assert_eq!(progress.snapshot().repeated_blocks, 10);
            assert_eq!(report.preloaded, usize::from(preload));
        }
    }

    #[test]
    fn test_zero_budget_decodes_every_reference() {
        let (header, media) = referenced_file(5);
        let progress = Progress::new();
        let report = Verifier::new(&header, &media, VerifyOptions::new().with_cache_budget(0))
            .verify(&progress)
            .unwrap();
        assert_eq!(report.repeated_blocks, 0);
        assert_eq!(report.preloaded, 0);
        assert_eq!(progress.snapshot().compressed_bytes, 6 * media.len() as u64);
    }

    #[test]
    fn test_first_error_stops_pipeline() {
        let block_count = 64;
        let data = vec![0x5Au8; block_count * 8];
        let mut map: Vec<MapEntry> = (0..block_count).map(|i| MapEntry::raw(i as u64 * 8, 8)).collect();
        map[17] = map[17].with_crc32(0xDEAD_BEEF);
        let header = ChdHeader::new(8, data.len() as u64, map);

        let err = Verifier::new(&header, &data, VerifyOptions::new().with_workers(3).with_queue_depth(1))
            .verify(&Progress::new())
            .unwrap_err();
        assert!(matches!(err, ChdError::ChecksumMismatch { block: 17, .. }));
    }

    #[test]
    fn test_invalid_map_rejected_up_front() {
        let header = ChdHeader::new(4, 8, vec![MapEntry::mini(0), MapEntry::self_ref(1)]);
        let err = Verifier::new(&header, &Vec::<u8>::new(), VerifyOptions::new())
            .verify(&Progress::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_flac_through_factory() {
        let samples: Vec<i16> = (0..8).collect();
        let mut payload = vec![b'B'];
        payload.extend(encode(&samples));
        let mut header = ChdHeader::new(
            16,
            16,
            vec![MapEntry::compressed(BlockCompression::Slot0, 0, payload.len() as u32)],
        );
        header.codecs[0] = Codec::FLAC;

        let options = VerifyOptions::new().with_audio(Arc::new(RawFramesFactory));
        let mut decoded = Vec::new();
        Verifier::new(&header, &payload, options)
            .verify_with(&Progress::new(), |_, data| decoded.extend_from_slice(data))
            .unwrap();
        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_be_bytes()).collect();
        assert_eq!(decoded, expected);

        let err = Verifier::new(&header, &payload, VerifyOptions::new())
            .verify(&Progress::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }
}
