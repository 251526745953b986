//! # Storage Module
//!
//! This module provides the storage channel underneath OakDB's paged
//! indices. The index layer never touches raw byte offsets; it consumes a
//! narrow, page-relative contract (`StorageChannel`) and leaves everything
//! else — file layout, growth, durability — to the channel implementation.
//!
//! ## Architecture Overview
//!
//! ```text
//! +-------------------------------+
//! |   Index Layer (LongLongIndex) |
//! +-------------------------------+
//! |   StorageChannel trait        |   seek_page / read_i64 / write_i16 ...
//! +-------------------------------+
//! |   MmapChannel (memmap2)       |   single file, fixed-size pages
//! +-------------------------------+
//! ```
//!
//! ## Page-Relative Access
//!
//! All reads and writes are sequenced onto the current page's byte cursor:
//! `seek_page(n)` selects a page and resets the cursor, and every
//! `read_*`/`write_*` call advances it. A cursor running off the end of the
//! page is an error, never silent wraparound. This keeps the index code free
//! of offset arithmetic and makes the on-disk encoding auditable in one
//! place.
//!
//! ## File Layout
//!
//! Database index files are concatenated fixed-size pages. Page 0 carries a
//! 128-byte file header (magic, version, root page, allocation watermark)
//! and is never handed out by `allocate_page`:
//!
//! ```text
//! Offset 0:        Page 0   (file header + reserved)
//! Offset 16384:    Page 1   (index page)
//! Offset 32768:    Page 2   (index page)
//! ...
//! ```
//!
//! ## Allocation
//!
//! `allocate_page` only appends: it hands out the next page number past the
//! allocation watermark and grows the file when needed. Recycling freed page
//! numbers is the free-space manager's job, which lives above this layer and
//! is not part of this crate.
//!
//! ## Module Organization
//!
//! - `channel`: the `StorageChannel` contract
//! - `headers`: zerocopy file header for page 0
//! - `mmap`: memory-mapped `MmapChannel` implementation

mod channel;
mod headers;
mod mmap;

pub use channel::StorageChannel;
pub use headers::{IndexFileHeader, CURRENT_VERSION, INDEX_MAGIC};
pub use mmap::MmapChannel;

pub const DEFAULT_PAGE_SIZE: usize = 16384;
pub const FILE_HEADER_SIZE: usize = 128;
