//! # Range Cursors
//!
//! Ascending and descending cursors over a closed key range `[min, max]`.
//! A cursor is a handle, not a borrow: its methods take the owning index
//! explicitly, so the session can interleave `next()` with `add_long` /
//! `remove_long` calls on the same index — the delete-while-iterating
//! pattern used when dropping an extent.
//!
//! ## Snapshot Protocol
//!
//! Opening a cursor bumps the index epoch. From that point every mutation
//! clones pages that predate the epoch instead of editing them (see the
//! tree module), so the page ids this cursor walks keep referring to the
//! tree as it stood at open time. Entries added or removed after the open
//! are invisible to the cursor; it yields each snapshot entry in range
//! exactly once, in key order, with no duplicates and no skips.
//!
//! ## Page Accounting
//!
//! Descending through a child that is not loaded in the live tree decodes
//! a private copy that is never linked into any parent. Private pages are
//! released as soon as the cursor moves past them; whatever remains is
//! released on `close()`, which also lets the index drop retired snapshot
//! pages once the last cursor is gone. Closing is idempotent; every other
//! method on a closed cursor reports exhaustion.
//!
//! ## Traversal State
//!
//! The cursor keeps the root-to-leaf path as a stack of
//! `(inner page, child slot)` frames plus a position inside the current
//! leaf. Advancing off a leaf pops frames until one has a further child,
//! then descends to the extreme leaf of that subtree. A separator bound
//! check on the way ends the walk early once the remaining subtrees fall
//! outside the range.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use super::page::{LongLongEntry, PageData, PageId};
use super::tree::LongLongIndex;
use super::MAX_TREE_DEPTH;
use crate::storage::StorageChannel;

type PathStack = SmallVec<[(PageId, usize); MAX_TREE_DEPTH]>;

enum Step {
    AtLeaf(usize),
    Descend(usize),
}

/// Ascending cursor over `[min, max]`.
#[derive(Debug)]
pub struct LongLongIterator {
    min: i64,
    max: i64,
    stack: PathStack,
    leaf: PageId,
    /// Slot of the next candidate entry in the current leaf.
    pos: usize,
    /// Pages this cursor decoded privately; released as it moves past them.
    private: Vec<PageId>,
    exhausted: bool,
    closed: bool,
}

impl LongLongIterator {
    pub(crate) fn open<C: StorageChannel>(
        index: &mut LongLongIndex<C>,
        min: i64,
        max: i64,
    ) -> Result<Self> {
        index.cursor_opened();

        let mut cursor = Self {
            min,
            max,
            stack: SmallVec::new(),
            leaf: index.root_id(),
            pos: 0,
            private: Vec::new(),
            exhausted: false,
            closed: false,
        };

        let mut current = index.root_id();
        loop {
            let step = {
                let page = index.page(current)?;
                match &page.data {
                    PageData::Leaf { keys, .. } => {
                        Step::AtLeaf(keys.partition_point(|&k| k < min))
                    }
                    PageData::Inner { .. } => Step::Descend(page.child_slot_for(min)?),
                }
            };
            match step {
                Step::AtLeaf(pos) => {
                    cursor.leaf = current;
                    cursor.pos = pos;
                    return Ok(cursor);
                }
                Step::Descend(slot) => {
                    cursor.stack.push((current, slot));
                    let (child, fresh) = index.load_child_for_cursor(current, slot)?;
                    if fresh {
                        cursor.private.push(child);
                    }
                    current = child;
                }
            }
        }
    }

    /// Whether another entry in range remains. Advances across leaves as a
    /// side effect, releasing consumed private pages.
    pub fn has_next<C: StorageChannel>(&mut self, index: &mut LongLongIndex<C>) -> Result<bool> {
        if self.closed || self.exhausted {
            return Ok(false);
        }

        loop {
            let verdict = {
                let page = index.page(self.leaf)?;
                let PageData::Leaf { keys, .. } = &page.data else {
                    bail!("cursor positioned on an inner page");
                };
                if self.pos < keys.len() {
                    Some(keys[self.pos] <= self.max)
                } else {
                    None
                }
            };
            match verdict {
                Some(true) => return Ok(true),
                Some(false) => {
                    self.exhaust(index)?;
                    return Ok(false);
                }
                None => {
                    if !self.advance_leaf(index)? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Returns the next entry in ascending key order, or an error if the
    /// cursor is exhausted or closed.
    pub fn next<C: StorageChannel>(
        &mut self,
        index: &mut LongLongIndex<C>,
    ) -> Result<LongLongEntry> {
        ensure!(self.has_next(index)?, "cursor exhausted");

        let page = index.page(self.leaf)?;
        let PageData::Leaf { keys, values } = &page.data else {
            bail!("cursor positioned on an inner page");
        };
        let entry = LongLongEntry {
            key: keys[self.pos],
            value: values[self.pos],
        };
        self.pos += 1;
        Ok(entry)
    }

    /// Releases the cursor's pages and, when it is the last cursor open on
    /// the index, the retired snapshot pages too. Idempotent.
    pub fn close<C: StorageChannel>(&mut self, index: &mut LongLongIndex<C>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for id in self.private.drain(..) {
            index.free_cursor_page(id)?;
        }
        self.stack.clear();
        self.closed = true;
        index.cursor_closed()
    }

    fn exhaust<C: StorageChannel>(&mut self, index: &mut LongLongIndex<C>) -> Result<()> {
        for id in self.private.drain(..) {
            index.free_cursor_page(id)?;
        }
        self.stack.clear();
        self.exhausted = true;
        Ok(())
    }

    fn release_if_private<C: StorageChannel>(
        &mut self,
        index: &mut LongLongIndex<C>,
        id: PageId,
    ) -> Result<()> {
        if let Some(at) = self.private.iter().position(|&p| p == id) {
            self.private.swap_remove(at);
            index.free_cursor_page(id)?;
        }
        Ok(())
    }

    /// Moves to the first leaf of the next subtree to the right. Returns
    /// false when no further subtree can hold in-range keys.
    fn advance_leaf<C: StorageChannel>(&mut self, index: &mut LongLongIndex<C>) -> Result<bool> {
        let consumed = self.leaf;
        self.release_if_private(index, consumed)?;

        loop {
            let Some((inner_id, slot)) = self.stack.pop() else {
                self.exhaust(index)?;
                return Ok(false);
            };

            let (child_count, subtree_min) = {
                let page = index.page(inner_id)?;
                let PageData::Inner { keys, children, .. } = &page.data else {
                    bail!("cursor stack frame is not an inner page");
                };
                let subtree_min = if slot + 1 < children.len() {
                    Some(keys[slot])
                } else {
                    None
                };
                (children.len(), subtree_min)
            };

            let Some(subtree_min) = subtree_min else {
                debug_assert_eq!(slot + 1, child_count);
                self.release_if_private(index, inner_id)?;
                continue;
            };

            // Everything under the next child is >= the separator; once
            // that passes max, no subtree further right can qualify.
            if subtree_min > self.max {
                self.exhaust(index)?;
                return Ok(false);
            }

            self.stack.push((inner_id, slot + 1));
            let (mut current, fresh) = index.load_child_for_cursor(inner_id, slot + 1)?;
            if fresh {
                self.private.push(current);
            }
            loop {
                let is_leaf = index.page(current)?.is_leaf();
                if is_leaf {
                    break;
                }
                self.stack.push((current, 0));
                let (child, fresh) = index.load_child_for_cursor(current, 0)?;
                if fresh {
                    self.private.push(child);
                }
                current = child;
            }
            self.leaf = current;
            self.pos = 0;
            return Ok(true);
        }
    }
}

/// Descending cursor over `[min, max]`, starting at `max`.
#[derive(Debug)]
pub struct DescendingLongLongIterator {
    max: i64,
    min: i64,
    stack: PathStack,
    leaf: PageId,
    /// Number of remaining candidates in the current leaf; the next entry
    /// sits at `pos - 1`.
    pos: usize,
    private: Vec<PageId>,
    exhausted: bool,
    closed: bool,
}

impl DescendingLongLongIterator {
    pub(crate) fn open<C: StorageChannel>(
        index: &mut LongLongIndex<C>,
        max: i64,
        min: i64,
    ) -> Result<Self> {
        index.cursor_opened();

        let mut cursor = Self {
            max,
            min,
            stack: SmallVec::new(),
            leaf: index.root_id(),
            pos: 0,
            private: Vec::new(),
            exhausted: false,
            closed: false,
        };

        let mut current = index.root_id();
        loop {
            let step = {
                let page = index.page(current)?;
                match &page.data {
                    PageData::Leaf { keys, .. } => {
                        Step::AtLeaf(keys.partition_point(|&k| k <= max))
                    }
                    PageData::Inner { .. } => Step::Descend(page.child_slot_for(max)?),
                }
            };
            match step {
                Step::AtLeaf(pos) => {
                    cursor.leaf = current;
                    cursor.pos = pos;
                    return Ok(cursor);
                }
                Step::Descend(slot) => {
                    cursor.stack.push((current, slot));
                    let (child, fresh) = index.load_child_for_cursor(current, slot)?;
                    if fresh {
                        cursor.private.push(child);
                    }
                    current = child;
                }
            }
        }
    }

    /// Whether another entry in range remains, retreating across leaves as
    /// a side effect.
    pub fn has_next<C: StorageChannel>(&mut self, index: &mut LongLongIndex<C>) -> Result<bool> {
        if self.closed || self.exhausted {
            return Ok(false);
        }

        loop {
            let verdict = {
                let page = index.page(self.leaf)?;
                let PageData::Leaf { keys, .. } = &page.data else {
                    bail!("cursor positioned on an inner page");
                };
                if self.pos > 0 {
                    Some(keys[self.pos - 1] >= self.min)
                } else {
                    None
                }
            };
            match verdict {
                Some(true) => return Ok(true),
                Some(false) => {
                    self.exhaust(index)?;
                    return Ok(false);
                }
                None => {
                    if !self.retreat_leaf(index)? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Returns the next entry in descending key order, or an error if the
    /// cursor is exhausted or closed.
    pub fn next<C: StorageChannel>(
        &mut self,
        index: &mut LongLongIndex<C>,
    ) -> Result<LongLongEntry> {
        ensure!(self.has_next(index)?, "cursor exhausted");

        let page = index.page(self.leaf)?;
        let PageData::Leaf { keys, values } = &page.data else {
            bail!("cursor positioned on an inner page");
        };
        let entry = LongLongEntry {
            key: keys[self.pos - 1],
            value: values[self.pos - 1],
        };
        self.pos -= 1;
        Ok(entry)
    }

    /// See [`LongLongIterator::close`].
    pub fn close<C: StorageChannel>(&mut self, index: &mut LongLongIndex<C>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for id in self.private.drain(..) {
            index.free_cursor_page(id)?;
        }
        self.stack.clear();
        self.closed = true;
        index.cursor_closed()
    }

    fn exhaust<C: StorageChannel>(&mut self, index: &mut LongLongIndex<C>) -> Result<()> {
        for id in self.private.drain(..) {
            index.free_cursor_page(id)?;
        }
        self.stack.clear();
        self.exhausted = true;
        Ok(())
    }

    fn release_if_private<C: StorageChannel>(
        &mut self,
        index: &mut LongLongIndex<C>,
        id: PageId,
    ) -> Result<()> {
        if let Some(at) = self.private.iter().position(|&p| p == id) {
            self.private.swap_remove(at);
            index.free_cursor_page(id)?;
        }
        Ok(())
    }

    /// Moves to the last leaf of the next subtree to the left. Returns
    /// false when no further subtree can hold in-range keys.
    fn retreat_leaf<C: StorageChannel>(&mut self, index: &mut LongLongIndex<C>) -> Result<bool> {
        let consumed = self.leaf;
        self.release_if_private(index, consumed)?;

        loop {
            let Some((inner_id, slot)) = self.stack.pop() else {
                self.exhaust(index)?;
                return Ok(false);
            };

            if slot == 0 {
                self.release_if_private(index, inner_id)?;
                continue;
            }

            let separator = {
                let page = index.page(inner_id)?;
                let PageData::Inner { keys, .. } = &page.data else {
                    bail!("cursor stack frame is not an inner page");
                };
                keys[slot - 1]
            };

            // Everything under the previous child is < the separator; once
            // that drops to min or below, no subtree further left can
            // qualify.
            if separator <= self.min {
                self.exhaust(index)?;
                return Ok(false);
            }

            self.stack.push((inner_id, slot - 1));
            let (mut current, fresh) = index.load_child_for_cursor(inner_id, slot - 1)?;
            if fresh {
                self.private.push(current);
            }
            loop {
                let last_slot = {
                    let page = index.page(current)?;
                    match &page.data {
                        PageData::Leaf { keys, .. } => {
                            self.leaf = current;
                            self.pos = keys.len();
                            return Ok(true);
                        }
                        PageData::Inner { children, .. } => children.len() - 1,
                    }
                };
                self.stack.push((current, last_slot));
                let (child, fresh) = index.load_child_for_cursor(current, last_slot)?;
                if fresh {
                    self.private.push(child);
                }
                current = child;
            }
        }
    }
}
