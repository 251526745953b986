//! # OakDB Index
//!
//! Disk-resident B+tree indices for an embedded object database: unique
//! `i64` keys mapped to `i64` values, used for the object-identifier index
//! (OID → data page) and per-field secondary indices (sortable field
//! encoding → OID).
//!
//! ## Quick Start
//!
//! ```no_run
//! use oakdb::index::LongLongIndex;
//! use oakdb::storage::MmapChannel;
//!
//! # fn main() -> eyre::Result<()> {
//! let channel = MmapChannel::create("objects.idx", 16384)?;
//! let mut index = LongLongIndex::create(channel)?;
//!
//! index.add_long(42, 7)?;
//! assert_eq!(index.find_value(42)?, Some(7));
//!
//! // Cursors stay stable while the same session keeps mutating.
//! let mut cursor = index.iterator(i64::MIN, i64::MAX)?;
//! while cursor.has_next(&mut index)? {
//!     let entry = cursor.next(&mut index)?;
//!     index.remove_long(entry.key)?;
//! }
//! cursor.close(&mut index)?;
//!
//! let root = index.write()?;
//! index.channel_mut().set_root_page(root)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layered Design
//!
//! - [`storage`] — the paged file contract (`StorageChannel`) and its
//!   memory-mapped implementation, including the file header.
//! - [`index`] — the B+tree itself: page model, arena, tree algorithms and
//!   snapshot-stable range cursors.
//!
//! Pages are loaded lazily on first touch and written back copy-on-write:
//! dirty pages get fresh page numbers at write time, so the previous
//! committed tree stays intact on disk until the root pointer moves.

pub mod index;
pub mod storage;

pub use index::{
    DescendingLongLongIterator, LongLongEntry, LongLongIndex, LongLongIterator,
};
pub use storage::{MmapChannel, StorageChannel};
