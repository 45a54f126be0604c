#![no_main]
use chd_verify::decompress::LzmaDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First 2 bytes: block size (capped to 64KB)
    let block_size = u16::from_le_bytes([data[0], data[1]]).max(1) as u32;

    let mut decoder = LzmaDecoder::chd(block_size);
    let mut out = vec![0u8; block_size as usize];
    let _ = decoder.decode(&data[2..], &mut out);
});
