//! Per-block checksums used by CHD map entries.
//!
//! V3/V4 maps carry a CRC-32 (IEEE, reflected), V5 maps a CRC-16
//! (CCITT, polynomial 0x1021, initial value 0xFFFF, not reflected).

/// CRC-16/CCITT-FALSE lookup table, one entry per leading byte.
const CCITT_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut byte = 0;
    while byte < 256 {
        let mut rem = (byte as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            rem = if rem & 0x8000 != 0 { (rem << 1) ^ 0x1021 } else { rem << 1 };
            bit += 1;
        }
        table[byte] = rem;
        byte += 1;
    }
    table
};

/// CRC-32 of a V3/V4 block.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// CRC-16 of a V5 block.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF_u16, |crc, &byte| {
        (crc << 8) ^ CCITT_TABLE[usize::from((crc >> 8) as u8 ^ byte)]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b""), 0xFFFF);
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_crc16_matches_bitwise() {
        let data: Vec<u8> = (0..=255u8).rev().collect();
        let mut crc = 0xFFFFu16;
        for &byte in &data {
            crc ^= u16::from(byte) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
            }
        }
        assert_eq!(crc16(&data), crc);
    }
}
