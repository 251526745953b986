//! # Index Page Model
//!
//! An index page is either a leaf (sorted keys plus a parallel value array)
//! or an inner page (sorted separator keys plus `n+1` child references).
//! Pages live in an arena addressed by `PageId`; the on-disk page number is
//! a separate identity assigned by the storage channel at write time.
//!
//! ## On-Disk Layout
//!
//! The leaf/inner discriminator rides in the sign of the entry count, so a
//! page is self-describing from its first two bytes:
//!
//! ```text
//! Leaf:   int16  nEntries            (positive)
//!         nEntries × (i64 key, i64 value)
//!
//! Inner:  int16 -nEntries            (negative)
//!         nEntries × i64 separator key
//!         nEntries+1 × u32 child page number
//! ```
//!
//! ## Navigation Semantics
//!
//! For an inner page with separators `k[0..n]` and children `c[0..=n]`:
//! every key in the subtree under `c[i+1]` is `>= k[i]`, and every key
//! under `c[0]` is `< k[0]`. Descent for key K therefore takes the child
//! whose index equals the number of separators `<= K`.
//!
//! ## Child References
//!
//! Inner pages carry two parallel child arrays: `child_pages` holds the
//! on-disk page numbers (0 for a page never written), and `children` holds
//! the arena id of the loaded in-memory copy, `None` until first touch.
//! The parent back-reference on each page is a non-owning id used only for
//! upward navigation during split/merge propagation.

use eyre::{bail, ensure, Result};

use crate::storage::StorageChannel;

/// Stable arena slot id for an in-memory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(pub(crate) u32);

impl PageId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// An immutable key/value pair returned by lookups and iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongLongEntry {
    pub key: i64,
    pub value: i64,
}

#[derive(Debug, Clone)]
pub enum PageData {
    Leaf {
        keys: Vec<i64>,
        values: Vec<i64>,
    },
    Inner {
        keys: Vec<i64>,
        /// Arena ids of loaded children, `None` until first touch.
        children: Vec<Option<PageId>>,
        /// On-disk page numbers, 0 for children never written back.
        child_pages: Vec<u32>,
    },
}

#[derive(Debug, Clone)]
pub struct Page {
    pub(crate) parent: Option<PageId>,
    pub(crate) disk_page: u32,
    pub(crate) generation: u64,
    pub(crate) dirty: bool,
    pub(crate) data: PageData,
}

impl Page {
    pub(crate) fn new_leaf(parent: Option<PageId>, generation: u64) -> Self {
        Self {
            parent,
            disk_page: 0,
            generation,
            dirty: true,
            data: PageData::Leaf {
                keys: Vec::new(),
                values: Vec::new(),
            },
        }
    }

    pub(crate) fn new_inner(
        parent: Option<PageId>,
        generation: u64,
        keys: Vec<i64>,
        children: Vec<Option<PageId>>,
        child_pages: Vec<u32>,
    ) -> Self {
        debug_assert_eq!(children.len(), keys.len() + 1);
        debug_assert_eq!(child_pages.len(), keys.len() + 1);
        Self {
            parent,
            disk_page: 0,
            generation,
            dirty: true,
            data: PageData::Inner {
                keys,
                children,
                child_pages,
            },
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self.data, PageData::Leaf { .. })
    }

    pub(crate) fn entry_count(&self) -> usize {
        match &self.data {
            PageData::Leaf { keys, .. } => keys.len(),
            PageData::Inner { keys, .. } => keys.len(),
        }
    }

    /// Child to descend into for `key`: the number of separators `<= key`.
    pub(crate) fn child_slot_for(&self, key: i64) -> Result<usize> {
        match &self.data {
            PageData::Inner { keys, .. } => Ok(keys.partition_point(|&k| k <= key)),
            PageData::Leaf { .. } => bail!("child_slot_for called on a leaf page"),
        }
    }

    /// Reads a page image from the channel. The caller has already seeked
    /// to the page; the entry-count sign selects the decoded shape.
    pub(crate) fn read_from<C: StorageChannel>(
        channel: &mut C,
        parent: Option<PageId>,
        disk_page: u32,
    ) -> Result<Self> {
        let tagged = channel.read_i16()?;

        let data = if tagged >= 0 {
            let n = tagged as usize;
            let mut keys = Vec::with_capacity(n);
            let mut values = Vec::with_capacity(n);
            for _ in 0..n {
                keys.push(channel.read_i64()?);
                values.push(channel.read_i64()?);
            }
            PageData::Leaf { keys, values }
        } else {
            let n = (-(tagged as i32)) as usize;
            let mut keys = Vec::with_capacity(n);
            for _ in 0..n {
                keys.push(channel.read_i64()?);
            }
            let mut child_pages = Vec::with_capacity(n + 1);
            for _ in 0..=n {
                let page_no = channel.read_u32()?;
                ensure!(
                    page_no != 0,
                    "corrupt inner page {}: child reference is 0",
                    disk_page
                );
                child_pages.push(page_no);
            }
            PageData::Inner {
                keys,
                children: vec![None; n + 1],
                child_pages,
            }
        };

        Ok(Self {
            parent,
            disk_page,
            generation: 0,
            dirty: false,
            data,
        })
    }

    /// Writes this page's image through the channel. The caller has already
    /// seeked to the target page and, for inner pages, refreshed
    /// `child_pages` with the children's current page numbers.
    pub(crate) fn write_to<C: StorageChannel>(&self, channel: &mut C) -> Result<()> {
        match &self.data {
            PageData::Leaf { keys, values } => {
                channel.write_i16(keys.len() as i16)?;
                for (&key, &value) in keys.iter().zip(values.iter()) {
                    channel.write_i64(key)?;
                    channel.write_i64(value)?;
                }
            }
            PageData::Inner {
                keys, child_pages, ..
            } => {
                // A keyless inner page would encode its count as 0, which
                // decodes as an empty leaf.
                ensure!(
                    !keys.is_empty(),
                    "inner page with no separators cannot be encoded"
                );
                channel.write_i16(-(keys.len() as i16))?;
                for &key in keys {
                    channel.write_i64(key)?;
                }
                for &page_no in child_pages {
                    ensure!(
                        page_no != 0,
                        "attempted to write inner page with an unassigned child reference"
                    );
                    channel.write_u32(page_no)?;
                }
            }
        }
        Ok(())
    }
}

/// Leaf capacity for a given usable page size: `2 + 16n <= page_size`.
pub(crate) fn leaf_capacity(page_size: usize) -> usize {
    (page_size - 2) / 16
}

/// Inner capacity: `2 + 8n + 4(n+1) <= page_size`.
pub(crate) fn inner_capacity(page_size: usize) -> usize {
    (page_size - 6) / 12
}
