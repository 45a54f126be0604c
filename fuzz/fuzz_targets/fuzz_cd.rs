#![no_main]
use chd_verify::decompress::cdrom::{self, CdScratch, SectorCodec};
use chd_verify::decompress::{Inflater, LzmaDecoder};
use chd_verify::formats::CD_FRAME_SIZE;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // Byte 0: frames per block (1-8), byte 1: sector codec
    let frames = 1 + (data[0] % 8) as usize;
    let block_len = frames * CD_FRAME_SIZE;
    let input = &data[2..];

    let mut out = vec![0u8; block_len];
    let mut inflater = Inflater::new();
    let mut scratch = CdScratch::default();
    if data[1] & 1 == 0 {
        let _ = cdrom::decode(input, &mut out, SectorCodec::Deflate, &mut inflater, &mut scratch);
    } else {
        let mut lzma = LzmaDecoder::chd(block_len as u32);
        let _ = cdrom::decode(input, &mut out, SectorCodec::Lzma(&mut lzma), &mut inflater, &mut scratch);
    }
});
