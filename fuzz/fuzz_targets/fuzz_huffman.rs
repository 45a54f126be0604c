#![no_main]
use chd_verify::decompress::{BitReader, HuffmanDecoder, RleHuffmanDecoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Byte 0: tree format (huffman-coded or RLE) and output length
    let mode = data[0];
    let input = &data[1..];
    let mut reader = BitReader::new(input);

    if mode & 1 == 0 {
        let mut decoder = HuffmanDecoder::new(256, 16);
        if decoder.import_tree_huffman(&mut reader).is_ok() {
            for _ in 0..(mode as usize * 4) {
                if decoder.decode_one(&mut reader).is_err() {
                    break;
                }
            }
        }
    } else {
        let mut decoder = RleHuffmanDecoder::new(16);
        if decoder.import_tree_rle(&mut reader).is_ok() {
            decoder.reset();
            for _ in 0..(mode as usize * 4) {
                if decoder.decode_one(&mut reader).is_err() {
                    break;
                }
            }
        }
    }
    let _ = reader.overflow();
});
