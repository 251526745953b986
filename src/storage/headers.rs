//! # File Header Definitions
//!
//! Every OakDB index file begins with a 128-byte header occupying the first
//! bytes of page 0. The header carries magic bytes, the format version, the
//! page size the file was created with, the current root page of the index
//! stored in the file, and the allocation watermark.
//!
//! ## Header Layout (128 bytes)
//!
//! ```text
//! Offset  Size  Field       Description
//! ------  ----  ----------  ----------------------------------------
//! 0       16    magic       b"OakDB Index\0\0\0\0\0"
//! 16      4     version     Format version (currently 1)
//! 20      4     page_size   Page size in bytes
//! 24      4     root_page   Root page of the index (0 = empty file)
//! 28      4     next_page   First page number never handed out
//! 32      96    reserved    Zeroed, reserved for future use
//! ```
//!
//! ## Zerocopy Safety
//!
//! The struct derives `FromBytes`/`IntoBytes`/`Immutable`/`KnownLayout`/
//! `Unaligned`, so it can be read from and written to page 0 without
//! copying or alignment concerns. All multi-byte fields are little-endian.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::FILE_HEADER_SIZE;

pub const INDEX_MAGIC: &[u8; 16] = b"OakDB Index\x00\x00\x00\x00\x00";
pub const CURRENT_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexFileHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    root_page: U32,
    next_page: U32,
    reserved: [u8; 96],
}

const _: () = assert!(std::mem::size_of::<IndexFileHeader>() == FILE_HEADER_SIZE);

impl IndexFileHeader {
    pub fn new(page_size: u32) -> Self {
        Self {
            magic: *INDEX_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(page_size),
            root_page: U32::new(0),
            next_page: U32::new(1),
            reserved: [0u8; 96],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for IndexFileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse IndexFileHeader: {:?}", e))?;

        ensure!(
            &header.magic == INDEX_MAGIC,
            "invalid magic bytes in index file"
        );

        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported index file version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for IndexFileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::mut_from_bytes(&mut bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse IndexFileHeader: {:?}", e))?;

        ensure!(
            &header.magic == INDEX_MAGIC,
            "invalid magic bytes in index file"
        );

        Ok(header)
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn root_page(&self) -> u32 {
        self.root_page.get()
    }

    pub fn set_root_page(&mut self, page_no: u32) {
        self.root_page = U32::new(page_no);
    }

    pub fn next_page(&self) -> u32 {
        self.next_page.get()
    }

    pub fn set_next_page(&mut self, page_no: u32) {
        self.next_page = U32::new(page_no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn header_roundtrips_through_bytes() {
        let mut header = IndexFileHeader::new(16384);
        header.set_root_page(7);
        header.set_next_page(12);

        let bytes = header.as_bytes().to_vec();
        let parsed = IndexFileHeader::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.version(), CURRENT_VERSION);
        assert_eq!(parsed.page_size(), 16384);
        assert_eq!(parsed.root_page(), 7);
        assert_eq!(parsed.next_page(), 12);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = IndexFileHeader::new(16384).as_bytes().to_vec();
        bytes[0] = b'X';

        assert!(IndexFileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn header_rejects_unsupported_version() {
        let mut bytes = IndexFileHeader::new(16384).as_bytes().to_vec();
        bytes[16] = 99;

        assert!(IndexFileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn header_rejects_short_buffer() {
        let bytes = [0u8; 64];

        assert!(IndexFileHeader::from_bytes(&bytes).is_err());
    }
}
