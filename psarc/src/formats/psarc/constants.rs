// PSARC layout constants. All multi-byte fields are big-endian.

pub const PSARC_MAGIC: [u8; 4] = *b"PSAR";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 4;
pub const COMPRESSION_ZLIB: [u8; 4] = *b"zlib";

pub const HEADER_SIZE: u32 = 32;
pub const TOC_ENTRY_SIZE: u32 = 30;
pub const BLOCK_SIZE: u32 = 64 * 1024;

/// Entry names are stored relative, case-sensitive.
pub const ARCHIVE_FLAGS_RELATIVE: u32 = 0;

/// Decoded entries above this size are spilled to an anonymous temp file.
pub const MEMORY_SPILL_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Bytes per block-size table element for a given block size.
pub fn block_size_width(block_size: u32) -> usize {
    let mut width = 1usize;
    while width < 4 && (1u64 << (8 * width)) < u64::from(block_size) {
        width += 1;
    }
    width
}
