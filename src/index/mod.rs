//! # Paged Long/Long Index
//!
//! This module implements OakDB's ordered index structure: a disk-resident
//! B+tree mapping 64-bit integer keys to 64-bit integer values. It backs
//! the object-identifier index (OID → data page) and the per-field
//! secondary indices (sortable field encoding → OID).
//!
//! ## Architecture Overview
//!
//! ```text
//! +--------------------------------------+
//! |  LongLongIndex (tree algorithms)     |  add / remove / find / cursors
//! +--------------------------------------+
//! |  PageArena (in-memory page slab)     |  PageId-addressed, COW cloning
//! +--------------------------------------+
//! |  StorageChannel (paged disk file)    |  lazy page load, write-back
//! +--------------------------------------+
//! ```
//!
//! Pages are loaded from the storage channel on first touch and live in an
//! arena addressed by stable `PageId`s. Parent/child relationships are id
//! references, never live object references, so substituting a page (for
//! copy-on-write) is a single id rebind in its parent.
//!
//! ## Node Types
//!
//! - **Leaf pages** hold sorted keys and a parallel value array. Key
//!   uniqueness is enforced at this layer: inserting an existing key
//!   overwrites its value slot.
//! - **Inner pages** hold sorted separator keys and `n+1` child references,
//!   kept as both an on-disk page number and an optional arena id for the
//!   loaded copy.
//!
//! The two shapes are a tagged variant (`PageData`), so leaf-only and
//! inner-only operations are statically exhaustive.
//!
//! ## Iteration Under Mutation
//!
//! Range cursors must see neither duplicated nor skipped entries when the
//! tree is mutated through the same session while they are open — the
//! classic delete-while-iterating-an-extent case. The index solves this
//! with copy-on-write snapshots: every page carries a generation counter,
//! the index carries an epoch bumped at cursor creation, and any page older
//! than the epoch is cloned before a structural change. The original page
//! stays in the arena as an immutable snapshot until the last cursor
//! closes, so a cursor's walk stays internally consistent without locks.
//!
//! ## Session Model
//!
//! Single-session, cooperative, non-parallel: all mutation and traversal
//! run synchronously on the calling context. Cross-session isolation is the
//! enclosing transaction manager's job, above this crate.
//!
//! ## Persistence
//!
//! `write()` flushes dirty pages depth-first through the storage channel.
//! Dirty pages get fresh page numbers at write time, parents are rewritten
//! when their children move, and the new root page number is returned for
//! the session to record (see `MmapChannel::set_root_page`).

mod arena;
mod cursor;
mod page;
mod tree;

pub use cursor::{DescendingLongLongIterator, LongLongIterator};
pub use page::{LongLongEntry, Page, PageData, PageId};
pub use tree::LongLongIndex;

pub(crate) use arena::PageArena;

/// Deepest tree the cursor stacks are inlined for. With default page sizes
/// a tree of this depth holds far more entries than an i64 key space can
/// address; deeper trees still work, they just spill to the heap.
pub const MAX_TREE_DEPTH: usize = 8;
