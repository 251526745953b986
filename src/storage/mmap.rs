//! # Memory-Mapped Storage Channel
//!
//! `MmapChannel` implements the `StorageChannel` contract over a single
//! memory-mapped file. Instead of copying page data between kernel buffers
//! and a user-space cache, the file is mapped directly into the process
//! address space and the OS page cache does the heavy lifting.
//!
//! ## Safety Model
//!
//! Memory-mapped regions become invalid when the file is grown and
//! remapped. `MmapChannel` never hands out references into the mapping;
//! every primitive copies a fixed-width integer in or out. Growth happens
//! only inside `&mut self` methods, so there is no window in which a stale
//! slice can be observed.
//!
//! ## File Format
//!
//! Page 0 holds the 128-byte `IndexFileHeader` (magic, version, page size,
//! root page, allocation watermark); the rest of page 0 is reserved. Pages
//! 1+ are index pages. The file size is always a whole number of pages.
//!
//! ## Growth Strategy
//!
//! `allocate_page` hands out the next page past the header's watermark and
//! doubles the file when the watermark catches up with the mapped size.
//! Doubling amortizes the cost of `set_len` + remap over many allocations.
//!
//! ## Durability
//!
//! `sync` flushes the mapping with msync (FlushViewOfFile on Windows). The
//! header is part of the mapping, so a single flush covers both data pages
//! and the root pointer.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use super::{IndexFileHeader, StorageChannel, FILE_HEADER_SIZE};

#[derive(Debug)]
pub struct MmapChannel {
    file: File,
    mmap: MmapMut,
    page_size: usize,
    page_count: u32,
    current_page: u32,
    cursor: usize,
}

impl MmapChannel {
    /// Creates a new index file with a fresh header and one reserved header
    /// page. Truncates any existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            page_size >= FILE_HEADER_SIZE && page_size % 512 == 0,
            "page size {} must be a multiple of 512 and hold the file header",
            page_size
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create index file '{}'", path.display()))?;

        file.set_len(page_size as u64)
            .wrap_err_with(|| format!("failed to size index file to {} bytes", page_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because externally modified
        // files lead to undefined behavior. This is safe because:
        // 1. The file was just created with truncate=true and is owned here
        // 2. The mapping's lifetime is tied to MmapChannel
        // 3. All access goes through bounds-checked cursor primitives
        let mut mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let header = IndexFileHeader::new(page_size as u32);
        mmap[..FILE_HEADER_SIZE].copy_from_slice(zerocopy::IntoBytes::as_bytes(&header));

        Ok(Self {
            file,
            mmap,
            page_size,
            page_count: 1,
            current_page: 0,
            cursor: 0,
        })
    }

    /// Opens an existing index file, validating its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open index file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_size >= FILE_HEADER_SIZE as u64,
            "index file '{}' too small to hold a header",
            path.display()
        );

        // SAFETY: see `create` — same ownership and access discipline.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let header = IndexFileHeader::from_bytes(&mmap[..FILE_HEADER_SIZE])?;
        let page_size = header.page_size() as usize;

        ensure!(
            file_size % page_size as u64 == 0,
            "index file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            page_size
        );

        let page_count = (file_size / page_size as u64) as u32;

        Ok(Self {
            file,
            mmap,
            page_size,
            page_count,
            current_page: 0,
            cursor: 0,
        })
    }

    /// Root page recorded in the file header, 0 if the index was never
    /// written back.
    pub fn root_page(&self) -> Result<u32> {
        let header = IndexFileHeader::from_bytes(&self.mmap[..FILE_HEADER_SIZE])?;
        Ok(header.root_page())
    }

    /// Records the index root in the file header. Callers persist the page
    /// number returned by the index write-back here so a later session can
    /// reconstruct the tree.
    pub fn set_root_page(&mut self, page_no: u32) -> Result<()> {
        let header = IndexFileHeader::from_bytes_mut(&mut self.mmap[..FILE_HEADER_SIZE])?;
        header.set_root_page(page_no);
        Ok(())
    }

    fn grow(&mut self, new_page_count: u32) -> Result<()> {
        if new_page_count <= self.page_count {
            return Ok(());
        }

        self.mmap
            .flush()
            .wrap_err("failed to flush mmap before grow")?;

        let new_size = new_page_count as u64 * self.page_size as u64;
        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend index file to {} bytes", new_size))?;

        // SAFETY: the old mapping is invalid after set_len. This is safe
        // because no references into the old mapping escape this struct and
        // the old map is dropped on assignment.
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file).wrap_err("failed to remap file after grow")? };

        self.page_count = new_page_count;
        Ok(())
    }

    fn cursor_range(&mut self, width: usize) -> Result<std::ops::Range<usize>> {
        ensure!(
            self.cursor + width <= self.page_size,
            "page cursor overflow on page {}: offset {} + {} exceeds page size {}",
            self.current_page,
            self.cursor,
            width,
            self.page_size
        );

        let base = self.current_page as usize * self.page_size;
        let start = base + self.cursor;
        self.cursor += width;
        Ok(start..start + width)
    }
}

impl StorageChannel for MmapChannel {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn allocate_page(&mut self) -> Result<u32> {
        let next = {
            let header = IndexFileHeader::from_bytes(&self.mmap[..FILE_HEADER_SIZE])?;
            header.next_page()
        };

        if next >= self.page_count {
            let doubled = self.page_count.saturating_mul(2).max(next + 1);
            self.grow(doubled)?;
        }

        let header = IndexFileHeader::from_bytes_mut(&mut self.mmap[..FILE_HEADER_SIZE])?;
        header.set_next_page(next + 1);
        Ok(next)
    }

    fn seek_page(&mut self, page_no: u32) -> Result<()> {
        ensure!(page_no != 0, "page 0 is reserved for the file header");
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );

        self.current_page = page_no;
        self.cursor = 0;
        Ok(())
    }

    fn read_i16(&mut self) -> Result<i16> {
        let range = self.cursor_range(2)?;
        let bytes: [u8; 2] = self.mmap[range].try_into().unwrap();
        Ok(i16::from_le_bytes(bytes))
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        let range = self.cursor_range(2)?;
        self.mmap[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32> {
        let range = self.cursor_range(4)?;
        let bytes: [u8; 4] = self.mmap[range].try_into().unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        let range = self.cursor_range(4)?;
        self.mmap[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn read_i64(&mut self) -> Result<i64> {
        let range = self.cursor_range(8)?;
        let bytes: [u8; 8] = self.mmap[range].try_into().unwrap();
        Ok(i64::from_le_bytes(bytes))
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        let range = self.cursor_range(8)?;
        self.mmap[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync mmap to disk")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn create_then_open_preserves_header() {
        let temp = NamedTempFile::new().unwrap();

        {
            let mut channel = MmapChannel::create(temp.path(), 4096).unwrap();
            channel.set_root_page(3).unwrap();
            channel.sync().unwrap();
        }

        let channel = MmapChannel::open(temp.path()).unwrap();
        assert_eq!(channel.page_size(), 4096);
        assert_eq!(channel.root_page().unwrap(), 3);
    }

    #[test]
    fn primitives_roundtrip_on_a_page() {
        let temp = NamedTempFile::new().unwrap();
        let mut channel = MmapChannel::create(temp.path(), 4096).unwrap();

        let page = channel.allocate_page().unwrap();
        channel.seek_page(page).unwrap();
        channel.write_i16(-5).unwrap();
        channel.write_i64(i64::MIN).unwrap();
        channel.write_u32(77).unwrap();
        channel.write_i64(42).unwrap();

        channel.seek_page(page).unwrap();
        assert_eq!(channel.read_i16().unwrap(), -5);
        assert_eq!(channel.read_i64().unwrap(), i64::MIN);
        assert_eq!(channel.read_u32().unwrap(), 77);
        assert_eq!(channel.read_i64().unwrap(), 42);
    }

    #[test]
    fn allocate_grows_the_file() {
        let temp = NamedTempFile::new().unwrap();
        let mut channel = MmapChannel::create(temp.path(), 4096).unwrap();

        let mut pages = Vec::new();
        for _ in 0..10 {
            pages.push(channel.allocate_page().unwrap());
        }

        // Sequential, unique, never page 0.
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(*page, i as u32 + 1);
        }
        assert!(channel.page_count() > 10);
    }

    #[test]
    fn seek_rejects_header_page_and_out_of_bounds() {
        let temp = NamedTempFile::new().unwrap();
        let mut channel = MmapChannel::create(temp.path(), 4096).unwrap();

        assert!(channel.seek_page(0).is_err());
        assert!(channel.seek_page(999).is_err());
    }

    #[test]
    fn cursor_overflow_is_an_error() {
        let temp = NamedTempFile::new().unwrap();
        let mut channel = MmapChannel::create(temp.path(), 512).unwrap();

        let page = channel.allocate_page().unwrap();
        channel.seek_page(page).unwrap();
        for _ in 0..64 {
            channel.write_i64(1).unwrap();
        }

        assert!(channel.write_i64(2).is_err());
    }
}
