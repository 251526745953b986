//! # Storage Channel Contract
//!
//! The index layer consumes paged storage through this trait. The contract
//! is deliberately narrow: select a page, then read or write fixed-width
//! integers sequenced onto that page's byte cursor. The index never computes
//! byte offsets itself, so the whole on-disk encoding is driven by the order
//! of primitive calls in `index::page`.
//!
//! ## Cursor Semantics
//!
//! `seek_page(n)` selects page `n` and resets the byte cursor to the start
//! of the page's usable area. Each `read_*`/`write_*` advances the cursor by
//! the width of the value. Running the cursor past the page end must fail
//! rather than spill into the next page.
//!
//! ## Integer Encoding
//!
//! All integers are little-endian, matching the rest of the file format.
//!
//! ## Allocation
//!
//! `allocate_page` returns a page number that has never been handed out for
//! this file and grows the backing store as needed. Implementations do not
//! recycle page numbers; that is the free-space manager's concern, outside
//! this crate.

use eyre::Result;

pub trait StorageChannel {
    /// Usable bytes per page.
    fn page_size(&self) -> usize;

    /// Total pages currently backed by the store, including page 0.
    fn page_count(&self) -> u32;

    /// Hands out a fresh page number, growing the store if necessary.
    fn allocate_page(&mut self) -> Result<u32>;

    /// Selects `page_no` and resets the byte cursor.
    fn seek_page(&mut self, page_no: u32) -> Result<()>;

    fn read_i16(&mut self) -> Result<i16>;
    fn write_i16(&mut self, value: i16) -> Result<()>;

    fn read_u32(&mut self) -> Result<u32>;
    fn write_u32(&mut self, value: u32) -> Result<()>;

    fn read_i64(&mut self) -> Result<i64>;
    fn write_i64(&mut self, value: i64) -> Result<()>;

    /// Durably flushes written pages.
    fn sync(&mut self) -> Result<()>;
}
