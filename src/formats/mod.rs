//! CHD codec identifiers and CD-ROM frame geometry.
//!
//! V5 headers name their four codec slots with big-endian four-character
//! tags. Older headers use small integers, which the header parser maps
//! onto the same [`Codec`] values.

/// Build a big-endian four-character code.
pub const fn make_tag(tag: &[u8; 4]) -> u32 {
    ((tag[0] as u32) << 24) | ((tag[1] as u32) << 16) | ((tag[2] as u32) << 8) | (tag[3] as u32)
}

/// Compression codecs a slot can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Raw deflate
    Zlib,
    /// Raw LZMA, dictionary = block size
    Lzma,
    /// Static MAME Huffman over bytes
    Huffman,
    /// FLAC, 16-bit stereo with a leading endianness byte
    Flac,
    /// CD frames: deflate sectors + deflate subcode
    CdZlib,
    /// CD frames: LZMA sectors + deflate subcode
    CdLzma,
    /// CD frames: FLAC sectors + deflate subcode
    CdFlac,
    /// Audio/video Huffman (laserdisc captures)
    AvHuff,
}

impl Codec {
    pub const ZLIB: u32 = make_tag(b"zlib");
    pub const LZMA: u32 = make_tag(b"lzma");
    pub const HUFFMAN: u32 = make_tag(b"huff");
    pub const FLAC: u32 = make_tag(b"flac");
    pub const CD_ZLIB: u32 = make_tag(b"cdzl");
    pub const CD_LZMA: u32 = make_tag(b"cdlz");
    pub const CD_FLAC: u32 = make_tag(b"cdfl");
    pub const AVHUFF: u32 = make_tag(b"avhu");

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            Self::ZLIB => Some(Self::Zlib),
            Self::LZMA => Some(Self::Lzma),
            Self::HUFFMAN => Some(Self::Huffman),
            Self::FLAC => Some(Self::Flac),
            Self::CD_ZLIB => Some(Self::CdZlib),
            Self::CD_LZMA => Some(Self::CdLzma),
            Self::CD_FLAC => Some(Self::CdFlac),
            Self::AVHUFF => Some(Self::AvHuff),
            _ => None,
        }
    }

    pub fn tag(&self) -> u32 {
        match self {
            Self::Zlib => Self::ZLIB,
            Self::Lzma => Self::LZMA,
            Self::Huffman => Self::HUFFMAN,
            Self::Flac => Self::FLAC,
            Self::CdZlib => Self::CD_ZLIB,
            Self::CdLzma => Self::CD_LZMA,
            Self::CdFlac => Self::CD_FLAC,
            Self::AvHuff => Self::AVHUFF,
        }
    }

    /// Whether every block of this codec goes through an external audio
    /// frame decoder.
    pub fn needs_audio(&self) -> bool {
        matches!(self, Self::Flac | Self::CdFlac)
    }
}

/// Render a tag as text for messages (`0x7a6c6962` → `zlib`).
pub fn tag_name(tag: u32) -> String {
    let bytes = tag.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic()) {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        format!("0x{:08x}", tag)
    }
}

/// Sector payload bytes per CD frame.
pub const CD_MAX_SECTOR_DATA: usize = 2352;

/// Subcode bytes per CD frame.
pub const CD_MAX_SUBCODE_DATA: usize = 96;

/// Full CD frame as stored in a block.
pub const CD_FRAME_SIZE: usize = CD_MAX_SECTOR_DATA + CD_MAX_SUBCODE_DATA;

/// Sync pattern at the start of every data sector.
pub const CD_SYNC_HEADER: [u8; 12] = [
    0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00,
];
