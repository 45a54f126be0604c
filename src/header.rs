//! Read-only CHD header model: the block map and the values verification
//! needs from the on-disk header.
//!
//! Parsing the on-disk header layouts is left to the caller; this module
//! only describes the result.

use crate::error::{ChdError, Result};

/// How a block is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockCompression {
    /// Compressed with the codec in header slot 0..3.
    Slot0,
    Slot1,
    Slot2,
    Slot3,
    /// Stored verbatim.
    None,
    /// Eight bytes repeated across the block, kept in the offset field.
    Mini,
    /// Same content as another block; the offset field holds its index.
    SelfRef,
}

impl BlockCompression {
    /// Codec slot index, if the block goes through a codec.
    pub fn slot(&self) -> Option<usize> {
        match self {
            Self::Slot0 => Some(0),
            Self::Slot1 => Some(1),
            Self::Slot2 => Some(2),
            Self::Slot3 => Some(3),
            Self::None | Self::Mini | Self::SelfRef => None,
        }
    }

    pub fn from_slot(slot: usize) -> Option<Self> {
        match slot {
            0 => Some(Self::Slot0),
            1 => Some(Self::Slot1),
            2 => Some(Self::Slot2),
            3 => Some(Self::Slot3),
            _ => None,
        }
    }
}

/// One block map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub compression: BlockCompression,
    /// Compressed length in bytes.
    pub length: u32,
    /// File offset, source block index (`SelfRef`) or pattern (`Mini`).
    pub offset: u64,
    pub crc32: Option<u32>,
    pub crc16: Option<u16>,
}

impl MapEntry {
    pub fn raw(offset: u64, length: u32) -> Self {
        Self {
            compression: BlockCompression::None,
            length,
            offset,
            crc32: None,
            crc16: None,
        }
    }

    pub fn compressed(slot: BlockCompression, offset: u64, length: u32) -> Self {
        Self {
            compression: slot,
            ..Self::raw(offset, length)
        }
    }

    pub fn mini(pattern: u64) -> Self {
        Self {
            compression: BlockCompression::Mini,
            ..Self::raw(pattern, 0)
        }
    }

    pub fn self_ref(source: usize) -> Self {
        Self {
            compression: BlockCompression::SelfRef,
            ..Self::raw(source as u64, 0)
        }
    }

    pub fn with_crc32(mut self, crc: u32) -> Self {
        self.crc32 = Some(crc);
        self
    }

    pub fn with_crc16(mut self, crc: u16) -> Self {
        self.crc16 = Some(crc);
        self
    }

    pub fn is_self_ref(&self) -> bool {
        self.compression == BlockCompression::SelfRef
    }

    /// Source block of a `SelfRef` entry.
    pub fn source_block(&self) -> Option<usize> {
        if self.is_self_ref() {
            usize::try_from(self.offset).ok()
        } else {
            None
        }
    }
}

/// Header values and block map of one CHD file.
#[derive(Debug, Clone, Default)]
pub struct ChdHeader {
    pub map: Vec<MapEntry>,
    pub block_size: u32,
    /// Logical size of the decoded stream. The last block may be short.
    pub total_bytes: u64,
    /// Four-character codec tags for slots 0..3, `0` when unused.
    pub codecs: [u32; 4],
    pub md5: Option<[u8; 16]>,
    pub raw_sha1: Option<[u8; 20]>,
}

impl ChdHeader {
    pub fn new(block_size: u32, total_bytes: u64, map: Vec<MapEntry>) -> Self {
        Self {
            map,
            block_size,
            total_bytes,
            ..Self::default()
        }
    }

    pub fn block_count(&self) -> usize {
        self.map.len()
    }

    /// Number of decoded bytes of block `index` that belong to the stream.
    pub fn block_len(&self, index: usize) -> usize {
        let start = index as u64 * self.block_size as u64;
        self.total_bytes
            .saturating_sub(start)
            .min(self.block_size as u64) as usize
    }

    /// Check that the block map covers `total_bytes`.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(ChdError::InvalidMap("block size is zero".into()));
        }
        let count = self.map.len() as u64;
        let block_size = self.block_size as u64;
        let covered = count.checked_mul(block_size);
        let fits = match covered {
            Some(covered) if count == 0 => self.total_bytes == covered,
            Some(covered) => (count - 1) * block_size < self.total_bytes && self.total_bytes <= covered,
            None => false,
        };
        if !fits {
            return Err(ChdError::InvalidMap(format!(
                "{} blocks of {} bytes do not cover {} bytes",
                count, self.block_size, self.total_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_len_clips_last_block() {
        let header = ChdHeader::new(4, 10, vec![MapEntry::mini(0); 3]);
        assert_eq!(header.block_len(0), 4);
        assert_eq!(header.block_len(1), 4);
        assert_eq!(header.block_len(2), 2);
        header.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_cover() {
        assert!(ChdHeader::new(4, 13, vec![MapEntry::mini(0); 3]).validate().is_err());
        assert!(ChdHeader::new(4, 8, vec![MapEntry::mini(0); 3]).validate().is_err());
        assert!(ChdHeader::new(0, 0, vec![]).validate().is_err());
        ChdHeader::new(4, 0, vec![]).validate().unwrap();
    }

    #[test]
    fn test_slots() {
        for slot in 0..4 {
            let compression = BlockCompression::from_slot(slot).unwrap();
            assert_eq!(compression.slot(), Some(slot));
        }
        assert_eq!(BlockCompression::from_slot(4), None);
        assert_eq!(BlockCompression::Mini.slot(), None);
    }

    #[test]
    fn test_self_ref_source() {
        assert_eq!(MapEntry::self_ref(7).source_block(), Some(7));
        assert_eq!(MapEntry::raw(7, 4).source_block(), None);
    }
}
