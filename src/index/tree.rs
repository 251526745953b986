//! # Unique Long/Long B+Tree
//!
//! This module implements the core tree algorithms over the page arena:
//! insertion with split-on-overflow, deletion with merge-on-underflow,
//! point lookup, rightmost-key lookup, and write-back. The cursor protocol
//! lives in `cursor`; this module supplies its page-lifecycle hooks.
//!
//! ## Descent
//!
//! All operations descend from the root choosing, at each inner page, the
//! child whose index equals the number of separators `<= key`. The write
//! path additionally runs the copy-on-write check top-down, so by the time
//! a page is mutated its parent is always already at the current epoch.
//!
//! ## Split Policy
//!
//! A leaf at `max_leaf_entries` splits by moving its upper
//! `max_leaf_entries - min_leaf_entries` entries into a fresh sibling; the
//! sibling's first key becomes the separator propagated to the parent. The
//! new entry then goes to whichever half its key sorts into. Inner pages
//! overflowing during separator propagation split around their middle key,
//! which is promoted one level up; promoting past a parentless page
//! synthesizes a new root one level taller.
//!
//! ## Merge Policy
//!
//! Deletion detaches leaves that become empty. A leaf that drops below
//! half of `max_leaf_entries` is merged into its previous sibling when
//! their combined size fits one page — but only when its new size is a
//! multiple of 8. The divisibility check is hysteresis: it bounds how
//! often a shrinking page probes its neighbor, at the cost of letting
//! pages sit below half full in between. Detaching a page applies the same
//! heuristic to the parent, one level up. An inner page left with a single
//! child and no separators is spliced out of the tree, its child taking
//! its place; at the root this shrinks the tree one level. Inner pages in
//! the tree therefore always carry at least one separator, which the disk
//! format relies on.
//!
//! ## Copy-on-Write Snapshots
//!
//! Every page carries a `generation`; the index carries an `epoch` bumped
//! whenever a cursor opens. While cursors are open, a page whose
//! generation predates the epoch is cloned before any mutation: the clone
//! (stamped with the current epoch) replaces the original in its parent —
//! or as root — and the original is retired. Retired pages stay readable
//! in the arena until the last cursor closes, so every open cursor keeps
//! walking the exact tree that existed when it was created. Pages created
//! at the current epoch are unreachable from any cursor snapshot and may
//! be mutated in place.
//!
//! ## Write-Back
//!
//! `write()` walks the loaded tree depth-first. Dirty pages receive fresh
//! page numbers from the channel (page-id assignment is deferred to write
//! time; old images are never overwritten within a session), parents pick
//! up their children's new page numbers, and the new root page number is
//! returned for the session to record in the file header.

use eyre::{bail, ensure, Result};

use super::cursor::{DescendingLongLongIterator, LongLongIterator};
use super::page::{inner_capacity, leaf_capacity, Page, PageData, PageId};
use super::PageArena;
use crate::storage::StorageChannel;

/// A disk-resident ordered index from unique `i64` keys to `i64` values.
///
/// One instance per logical key space (the OID index, or one per indexed
/// field). All state is scoped to the instance; there are no process-wide
/// statics. Single-session, non-parallel access: mutation and iteration
/// interleave on the calling context only.
#[derive(Debug)]
pub struct LongLongIndex<C: StorageChannel> {
    channel: C,
    arena: PageArena,
    root: PageId,
    max_leaf_entries: usize,
    min_leaf_entries: usize,
    max_inner_entries: usize,
    /// Leaves currently materialized in the live tree.
    leaf_count: usize,
    /// Bumped when a cursor opens; pages older than this are cloned before
    /// mutation while any cursor remains open.
    epoch: u64,
    open_cursors: usize,
    /// Snapshot pages detached from the live tree, kept for open cursors.
    retired: Vec<PageId>,
    pages_read: u64,
    pages_written: u64,
}

impl<C: StorageChannel> LongLongIndex<C> {
    /// Creates an empty index whose page capacities are derived from the
    /// channel's page size.
    pub fn create(channel: C) -> Result<Self> {
        let page_size = channel.page_size();
        Self::create_with_order(
            channel,
            leaf_capacity(page_size),
            inner_capacity(page_size),
        )
    }

    /// Creates an empty index with explicit page capacities. Small orders
    /// keep multi-level trees cheap to construct in tests.
    pub fn create_with_order(
        channel: C,
        max_leaf_entries: usize,
        max_inner_entries: usize,
    ) -> Result<Self> {
        Self::check_order(&channel, max_leaf_entries, max_inner_entries)?;

        let mut arena = PageArena::new();
        let root = arena.insert(Page::new_leaf(None, 0));

        Ok(Self {
            channel,
            arena,
            root,
            max_leaf_entries,
            min_leaf_entries: max_leaf_entries / 2,
            max_inner_entries,
            leaf_count: 1,
            epoch: 0,
            open_cursors: 0,
            retired: Vec::new(),
            pages_read: 0,
            pages_written: 0,
        })
    }

    /// Reconstructs an index from the root page number recorded by a
    /// previous session's write-back. A root of 0 — a file that was
    /// created but never written back — yields an empty index.
    pub fn open(channel: C, root_page: u32) -> Result<Self> {
        let page_size = channel.page_size();
        Self::open_with_order(
            channel,
            root_page,
            leaf_capacity(page_size),
            inner_capacity(page_size),
        )
    }

    pub fn open_with_order(
        mut channel: C,
        root_page: u32,
        max_leaf_entries: usize,
        max_inner_entries: usize,
    ) -> Result<Self> {
        Self::check_order(&channel, max_leaf_entries, max_inner_entries)?;

        let mut arena = PageArena::new();
        let (root, root_is_leaf, pages_read) = if root_page == 0 {
            // Never written back; the empty tree is a fresh root leaf.
            (arena.insert(Page::new_leaf(None, 0)), true, 0)
        } else {
            channel.seek_page(root_page)?;
            let page = Page::read_from(&mut channel, None, root_page)?;
            let is_leaf = page.is_leaf();
            (arena.insert(page), is_leaf, 1)
        };

        Ok(Self {
            channel,
            arena,
            root,
            max_leaf_entries,
            min_leaf_entries: max_leaf_entries / 2,
            max_inner_entries,
            leaf_count: usize::from(root_is_leaf),
            epoch: 0,
            open_cursors: 0,
            retired: Vec::new(),
            pages_read,
            pages_written: 0,
        })
    }

    fn check_order(channel: &C, max_leaf: usize, max_inner: usize) -> Result<()> {
        let page_size = channel.page_size();
        ensure!(
            max_leaf >= 2 && max_leaf <= leaf_capacity(page_size),
            "leaf order {} out of range for page size {}",
            max_leaf,
            page_size
        );
        ensure!(
            max_inner >= 2 && max_inner <= inner_capacity(page_size),
            "inner order {} out of range for page size {}",
            max_inner,
            page_size
        );
        Ok(())
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Leaves materialized in the live tree this session.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Pages decoded from the channel so far.
    pub fn pages_read(&self) -> u64 {
        self.pages_read
    }

    /// Pages written back so far.
    pub fn pages_written(&self) -> u64 {
        self.pages_written
    }

    /// Pages currently held in memory, including cursor snapshots.
    pub fn loaded_pages(&self) -> usize {
        self.arena.len()
    }

    // ---------------------------------------------------------------
    // Page lifecycle
    // ---------------------------------------------------------------

    /// Returns the loaded child at `slot`, decoding it from the channel on
    /// first touch and caching the arena id in the parent.
    fn read_or_create_page(&mut self, parent_id: PageId, slot: usize) -> Result<PageId> {
        let (cached, disk_page) = match &self.arena.get(parent_id)?.data {
            PageData::Inner {
                children,
                child_pages,
                ..
            } => {
                ensure!(
                    slot < children.len(),
                    "child slot {} out of bounds ({} children)",
                    slot,
                    children.len()
                );
                (children[slot], child_pages[slot])
            }
            PageData::Leaf { .. } => bail!("cannot descend into a leaf page"),
        };

        if let Some(id) = cached {
            return Ok(id);
        }

        ensure!(
            disk_page != 0,
            "unloaded child at slot {} has no page reference",
            slot
        );

        self.channel.seek_page(disk_page)?;
        let page = Page::read_from(&mut self.channel, Some(parent_id), disk_page)?;
        self.pages_read += 1;
        let is_leaf = page.is_leaf();
        let id = self.arena.insert(page);

        if let PageData::Inner { children, .. } = &mut self.arena.get_mut(parent_id)?.data {
            children[slot] = Some(id);
        }
        if is_leaf {
            self.leaf_count += 1;
        }

        Ok(id)
    }

    /// Copy-on-write hook: returns a page safe to mutate. While cursors
    /// are open, pages older than the current epoch are cloned, the clone
    /// substituted into the (already current) parent or the root slot, and
    /// the original retired as a cursor snapshot.
    fn prepare_write(&mut self, id: PageId) -> Result<PageId> {
        let page = self.arena.get(id)?;
        if self.open_cursors == 0 || page.generation == self.epoch {
            return Ok(id);
        }

        let mut clone = page.clone();
        clone.generation = self.epoch;
        let parent = clone.parent;
        let new_id = self.arena.insert(clone);

        match parent {
            Some(parent_id) => {
                let slot = self.child_slot_of(parent_id, id)?;
                match &mut self.arena.get_mut(parent_id)?.data {
                    PageData::Inner { children, .. } => children[slot] = Some(new_id),
                    PageData::Leaf { .. } => bail!("parent of page {:?} is a leaf", id),
                }
            }
            None => {
                ensure!(
                    self.root == id,
                    "parentless page {:?} is not the root",
                    id
                );
                self.root = new_id;
            }
        }

        // The clone's loaded children still point their parent link at the
        // retired original; rebind them for upward navigation.
        let kids: Vec<PageId> = match &self.arena.get(new_id)?.data {
            PageData::Inner { children, .. } => children.iter().flatten().copied().collect(),
            PageData::Leaf { .. } => Vec::new(),
        };
        for kid in kids {
            self.arena.get_mut(kid)?.parent = Some(new_id);
        }

        self.retired.push(id);
        Ok(new_id)
    }

    /// Drops a page detached from the live tree, or parks it for open
    /// cursors.
    fn retire_or_free(&mut self, id: PageId) -> Result<()> {
        if self.open_cursors > 0 {
            self.retired.push(id);
            Ok(())
        } else {
            self.arena.free(id)
        }
    }

    fn child_slot_of(&self, parent_id: PageId, child_id: PageId) -> Result<usize> {
        match &self.arena.get(parent_id)?.data {
            PageData::Inner { children, .. } => children
                .iter()
                .position(|c| *c == Some(child_id))
                .ok_or_else(|| {
                    eyre::eyre!("page {:?} not referenced by its parent {:?}", child_id, parent_id)
                }),
            PageData::Leaf { .. } => bail!("page {:?} is a leaf, not a parent", parent_id),
        }
    }

    /// Write-path descent: prepares every page on the root-to-leaf path
    /// for mutation (top-down, so parents are current before children).
    fn descend_to_leaf_for_write(&mut self, key: i64) -> Result<PageId> {
        let mut current = self.prepare_write(self.root)?;
        loop {
            if self.arena.get(current)?.is_leaf() {
                return Ok(current);
            }
            let slot = self.arena.get(current)?.child_slot_for(key)?;
            let child = self.read_or_create_page(current, slot)?;
            current = self.prepare_write(child)?;
        }
    }

    // ---------------------------------------------------------------
    // Insertion
    // ---------------------------------------------------------------

    /// Inserts `key → value`, overwriting the value slot if the key is
    /// already present (the page is dirtied only when the value actually
    /// changed).
    pub fn add_long(&mut self, key: i64, value: i64) -> Result<()> {
        let leaf_id = self.descend_to_leaf_for_write(key)?;

        enum Action {
            Overwrite(usize),
            Insert(usize),
            Split,
        }

        let action = {
            let page = self.arena.get(leaf_id)?;
            let PageData::Leaf { keys, .. } = &page.data else {
                bail!("descent ended on an inner page");
            };
            match keys.binary_search(&key) {
                Ok(pos) => Action::Overwrite(pos),
                Err(pos) if keys.len() < self.max_leaf_entries => Action::Insert(pos),
                Err(_) => Action::Split,
            }
        };

        match action {
            Action::Overwrite(pos) => {
                let page = self.arena.get_mut(leaf_id)?;
                let PageData::Leaf { values, .. } = &mut page.data else {
                    unreachable!()
                };
                if values[pos] != value {
                    values[pos] = value;
                    page.dirty = true;
                }
                Ok(())
            }
            Action::Insert(pos) => {
                let page = self.arena.get_mut(leaf_id)?;
                let PageData::Leaf { keys, values } = &mut page.data else {
                    unreachable!()
                };
                keys.insert(pos, key);
                values.insert(pos, value);
                page.dirty = true;
                Ok(())
            }
            Action::Split => self.split_leaf_and_insert(leaf_id, key, value),
        }
    }

    fn split_leaf_and_insert(&mut self, leaf_id: PageId, key: i64, value: i64) -> Result<()> {
        let move_n = self.max_leaf_entries - self.min_leaf_entries;

        let (sibling_keys, sibling_values, parent) = {
            let page = self.arena.get_mut(leaf_id)?;
            let parent = page.parent;
            let PageData::Leaf { keys, values } = &mut page.data else {
                bail!("split_leaf_and_insert on an inner page");
            };
            let split_at = keys.len() - move_n;
            let sibling_keys = keys.split_off(split_at);
            let sibling_values = values.split_off(split_at);
            page.dirty = true;
            (sibling_keys, sibling_values, parent)
        };

        let separator = sibling_keys[0];

        let mut sibling = Page::new_leaf(parent, self.epoch);
        sibling.data = PageData::Leaf {
            keys: sibling_keys,
            values: sibling_values,
        };
        let sibling_id = self.arena.insert(sibling);
        self.leaf_count += 1;

        // The new entry goes to whichever half its key sorts into.
        let target = if key < separator { leaf_id } else { sibling_id };
        {
            let page = self.arena.get_mut(target)?;
            let PageData::Leaf { keys, values } = &mut page.data else {
                unreachable!()
            };
            let pos = match keys.binary_search(&key) {
                Ok(_) => bail!("key {} already present after split", key),
                Err(pos) => pos,
            };
            keys.insert(pos, key);
            values.insert(pos, value);
            page.dirty = true;
        }

        self.add_child_page(leaf_id, separator, sibling_id)
    }

    /// Hangs `right_id` next to `left_id` under their parent, separated by
    /// `separator`. Splitting a parentless page synthesizes a new root.
    fn add_child_page(&mut self, left_id: PageId, separator: i64, right_id: PageId) -> Result<()> {
        let parent = self.arena.get(left_id)?.parent;

        let Some(parent_id) = parent else {
            ensure!(
                self.root == left_id,
                "parentless page {:?} is not the root",
                left_id
            );
            let left_disk = self.arena.get(left_id)?.disk_page;
            let right_disk = self.arena.get(right_id)?.disk_page;
            let root = Page::new_inner(
                None,
                self.epoch,
                vec![separator],
                vec![Some(left_id), Some(right_id)],
                vec![left_disk, right_disk],
            );
            let root_id = self.arena.insert(root);
            self.arena.get_mut(left_id)?.parent = Some(root_id);
            self.arena.get_mut(right_id)?.parent = Some(root_id);
            self.root = root_id;
            return Ok(());
        };

        let right_disk = self.arena.get(right_id)?.disk_page;
        {
            let slot = self.child_slot_of(parent_id, left_id)?;
            let page = self.arena.get_mut(parent_id)?;
            let PageData::Inner {
                keys,
                children,
                child_pages,
            } = &mut page.data
            else {
                bail!("parent {:?} is a leaf", parent_id);
            };
            keys.insert(slot, separator);
            children.insert(slot + 1, Some(right_id));
            child_pages.insert(slot + 1, right_disk);
            page.dirty = true;
        }
        self.arena.get_mut(right_id)?.parent = Some(parent_id);

        if self.arena.get(parent_id)?.entry_count() > self.max_inner_entries {
            self.split_inner(parent_id)?;
        }
        Ok(())
    }

    fn split_inner(&mut self, page_id: PageId) -> Result<()> {
        let (promoted, right_keys, right_children, right_child_pages, parent) = {
            let page = self.arena.get_mut(page_id)?;
            let parent = page.parent;
            let PageData::Inner {
                keys,
                children,
                child_pages,
            } = &mut page.data
            else {
                bail!("split_inner on a leaf page");
            };
            let mid = keys.len() / 2;
            let promoted = keys[mid];
            let right_keys = keys.split_off(mid + 1);
            keys.pop();
            let right_children = children.split_off(mid + 1);
            let right_child_pages = child_pages.split_off(mid + 1);
            page.dirty = true;
            (promoted, right_keys, right_children, right_child_pages, parent)
        };

        let moved: Vec<PageId> = right_children.iter().flatten().copied().collect();
        let sibling = Page::new_inner(
            parent,
            self.epoch,
            right_keys,
            right_children,
            right_child_pages,
        );
        let sibling_id = self.arena.insert(sibling);
        for kid in moved {
            self.arena.get_mut(kid)?.parent = Some(sibling_id);
        }

        self.add_child_page(page_id, promoted, sibling_id)
    }

    // ---------------------------------------------------------------
    // Deletion
    // ---------------------------------------------------------------

    /// Removes `key`, returning whether it was present. A key that is seen
    /// on the read path but missing on the write path means the tree
    /// violated its own invariants, which is fatal.
    pub fn remove_long(&mut self, key: i64) -> Result<bool> {
        if self.find_value(key)?.is_none() {
            return Ok(false);
        }

        let leaf_id = self.descend_to_leaf_for_write(key)?;
        let remaining = {
            let page = self.arena.get_mut(leaf_id)?;
            let PageData::Leaf { keys, values } = &mut page.data else {
                bail!("removal descent ended on an inner page");
            };
            let Ok(pos) = keys.binary_search(&key) else {
                bail!("key {} vanished between lookup and removal", key);
            };
            keys.remove(pos);
            values.remove(pos);
            page.dirty = true;
            keys.len()
        };

        if remaining == 0 {
            self.detach_leaf(leaf_id)?;
        } else if remaining < self.max_leaf_entries / 2 && remaining % 8 == 0 {
            self.try_merge_leaf(leaf_id)?;
        }

        Ok(true)
    }

    fn detach_leaf(&mut self, leaf_id: PageId) -> Result<()> {
        let Some(parent_id) = self.arena.get(leaf_id)?.parent else {
            // An empty root leaf is the legal shape of an empty tree.
            return Ok(());
        };
        let slot = self.child_slot_of(parent_id, leaf_id)?;
        self.leaf_count -= 1;
        self.retire_or_free(leaf_id)?;
        self.detach_child(parent_id, slot)
    }

    /// Merges a shrinking leaf into its previous sibling when the combined
    /// size still fits one page.
    fn try_merge_leaf(&mut self, leaf_id: PageId) -> Result<()> {
        let Some(parent_id) = self.arena.get(leaf_id)?.parent else {
            return Ok(());
        };
        let slot = self.child_slot_of(parent_id, leaf_id)?;
        if slot == 0 {
            return Ok(());
        }

        let prev_id = self.read_or_create_page(parent_id, slot - 1)?;
        {
            let prev = self.arena.get(prev_id)?;
            ensure!(
                prev.is_leaf(),
                "sibling of leaf {:?} is an inner page",
                leaf_id
            );
            if prev.entry_count() + self.arena.get(leaf_id)?.entry_count()
                > self.max_leaf_entries
            {
                return Ok(());
            }
        }

        let prev_id = self.prepare_write(prev_id)?;

        let (moved_keys, moved_values) = {
            let page = self.arena.get_mut(leaf_id)?;
            let PageData::Leaf { keys, values } = &mut page.data else {
                unreachable!()
            };
            (std::mem::take(keys), std::mem::take(values))
        };
        {
            let page = self.arena.get_mut(prev_id)?;
            let PageData::Leaf { keys, values } = &mut page.data else {
                unreachable!()
            };
            keys.extend(moved_keys);
            values.extend(moved_values);
            page.dirty = true;
        }

        self.leaf_count -= 1;
        self.retire_or_free(leaf_id)?;
        self.detach_child(parent_id, slot)
    }

    /// Unhooks the child at `slot` from `parent_id`, removing the
    /// separator between the detached page and the sibling that stays.
    /// May cascade: a parent left without separators is spliced out of the
    /// tree, and a shrinking parent probes its own previous sibling under
    /// the same heuristic.
    fn detach_child(&mut self, parent_id: PageId, slot: usize) -> Result<()> {
        let key_count = {
            let page = self.arena.get_mut(parent_id)?;
            let PageData::Inner {
                keys,
                children,
                child_pages,
            } = &mut page.data
            else {
                bail!("detach_child on a leaf page");
            };
            ensure!(
                slot < children.len(),
                "detach slot {} out of bounds ({} children)",
                slot,
                children.len()
            );
            ensure!(
                !keys.is_empty(),
                "inner page {:?} has children but no separators",
                parent_id
            );
            children.remove(slot);
            child_pages.remove(slot);
            keys.remove(slot.saturating_sub(1));
            page.dirty = true;
            keys.len()
        };

        if key_count == 0 {
            // A single child and no separators left: the page indexes
            // nothing, and its on-disk entry count would be
            // indistinguishable from an empty leaf. Splice the child into
            // this page's own position — as the new root when parentless,
            // otherwise directly under the grandparent.
            let child_id = self.read_or_create_page(parent_id, 0)?;
            match self.arena.get(parent_id)?.parent {
                None => {
                    self.arena.get_mut(child_id)?.parent = None;
                    self.root = child_id;
                }
                Some(gp) => {
                    let gp_slot = self.child_slot_of(gp, parent_id)?;
                    let child_disk = self.arena.get(child_id)?.disk_page;
                    let page = self.arena.get_mut(gp)?;
                    let PageData::Inner {
                        children,
                        child_pages,
                        ..
                    } = &mut page.data
                    else {
                        bail!("grandparent {:?} is a leaf", gp);
                    };
                    children[gp_slot] = Some(child_id);
                    child_pages[gp_slot] = child_disk;
                    page.dirty = true;
                    self.arena.get_mut(child_id)?.parent = Some(gp);
                }
            }
            self.retire_or_free(parent_id)?;
            return Ok(());
        }

        if key_count < self.max_inner_entries / 2 && key_count % 8 == 0 {
            self.try_merge_inner(parent_id)?;
        }
        Ok(())
    }

    /// Merges a shrinking inner page into its previous sibling, pulling
    /// the parent separator down between the two key runs.
    fn try_merge_inner(&mut self, page_id: PageId) -> Result<()> {
        let Some(parent_id) = self.arena.get(page_id)?.parent else {
            return Ok(());
        };
        let slot = self.child_slot_of(parent_id, page_id)?;
        if slot == 0 {
            return Ok(());
        }

        let separator = match &self.arena.get(parent_id)?.data {
            PageData::Inner { keys, .. } => keys[slot - 1],
            PageData::Leaf { .. } => unreachable!(),
        };

        let prev_id = self.read_or_create_page(parent_id, slot - 1)?;
        {
            let prev = self.arena.get(prev_id)?;
            ensure!(
                !prev.is_leaf(),
                "sibling of inner page {:?} is a leaf",
                page_id
            );
            if prev.entry_count() + 1 + self.arena.get(page_id)?.entry_count()
                > self.max_inner_entries
            {
                return Ok(());
            }
        }

        let prev_id = self.prepare_write(prev_id)?;

        let (moved_keys, moved_children, moved_child_pages) = {
            let page = self.arena.get_mut(page_id)?;
            let PageData::Inner {
                keys,
                children,
                child_pages,
            } = &mut page.data
            else {
                unreachable!()
            };
            (
                std::mem::take(keys),
                std::mem::take(children),
                std::mem::take(child_pages),
            )
        };
        let moved: Vec<PageId> = moved_children.iter().flatten().copied().collect();
        {
            let page = self.arena.get_mut(prev_id)?;
            let PageData::Inner {
                keys,
                children,
                child_pages,
            } = &mut page.data
            else {
                unreachable!()
            };
            keys.push(separator);
            keys.extend(moved_keys);
            children.extend(moved_children);
            child_pages.extend(moved_child_pages);
            page.dirty = true;
        }
        for kid in moved {
            self.arena.get_mut(kid)?.parent = Some(prev_id);
        }

        self.retire_or_free(page_id)?;
        self.detach_child(parent_id, slot)
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    /// Point lookup. Absence is a normal outcome, not an error.
    pub fn find_value(&mut self, key: i64) -> Result<Option<i64>> {
        let mut current = self.root;
        loop {
            let slot = {
                let page = self.arena.get(current)?;
                match &page.data {
                    PageData::Leaf { keys, values } => {
                        return Ok(keys.binary_search(&key).ok().map(|pos| values[pos]));
                    }
                    PageData::Inner { .. } => page.child_slot_for(key)?,
                }
            };
            current = self.read_or_create_page(current, slot)?;
        }
    }

    /// Largest key currently stored, or `i64::MIN` for an empty tree.
    pub fn max_key(&mut self) -> Result<i64> {
        let mut current = self.root;
        loop {
            let last_slot = {
                let page = self.arena.get(current)?;
                match &page.data {
                    PageData::Leaf { keys, .. } => {
                        return Ok(keys.last().copied().unwrap_or(i64::MIN));
                    }
                    PageData::Inner { children, .. } => children.len() - 1,
                }
            };
            current = self.read_or_create_page(current, last_slot)?;
        }
    }

    // ---------------------------------------------------------------
    // Cursors
    // ---------------------------------------------------------------

    /// Opens an ascending cursor over `[min, max]`. Each call yields an
    /// independent cursor positioned at the start of the range.
    pub fn iterator(&mut self, min: i64, max: i64) -> Result<LongLongIterator> {
        LongLongIterator::open(self, min, max)
    }

    /// Opens a descending cursor over `[min, max]`, starting at `max`.
    pub fn descending_iterator(
        &mut self,
        max: i64,
        min: i64,
    ) -> Result<DescendingLongLongIterator> {
        DescendingLongLongIterator::open(self, max, min)
    }

    pub(crate) fn root_id(&self) -> PageId {
        self.root
    }

    pub(crate) fn page(&self, id: PageId) -> Result<&Page> {
        self.arena.get(id)
    }

    /// Cursor-side child access: reuses the live cached child when one is
    /// loaded, otherwise decodes a private copy that is never linked into
    /// the tree. Returns the id and whether the load was private.
    pub(crate) fn load_child_for_cursor(
        &mut self,
        parent_id: PageId,
        slot: usize,
    ) -> Result<(PageId, bool)> {
        let (cached, disk_page) = match &self.arena.get(parent_id)?.data {
            PageData::Inner {
                children,
                child_pages,
                ..
            } => {
                ensure!(
                    slot < children.len(),
                    "cursor child slot {} out of bounds ({} children)",
                    slot,
                    children.len()
                );
                (children[slot], child_pages[slot])
            }
            PageData::Leaf { .. } => bail!("cursor cannot descend into a leaf page"),
        };

        if let Some(id) = cached {
            return Ok((id, false));
        }

        ensure!(
            disk_page != 0,
            "unloaded cursor child at slot {} has no page reference",
            slot
        );

        self.channel.seek_page(disk_page)?;
        let page = Page::read_from(&mut self.channel, None, disk_page)?;
        self.pages_read += 1;
        Ok((self.arena.insert(page), true))
    }

    pub(crate) fn free_cursor_page(&mut self, id: PageId) -> Result<()> {
        self.arena.free(id)
    }

    pub(crate) fn cursor_opened(&mut self) {
        self.open_cursors += 1;
        self.epoch += 1;
    }

    pub(crate) fn cursor_closed(&mut self) -> Result<()> {
        ensure!(self.open_cursors > 0, "cursor close without matching open");
        self.open_cursors -= 1;
        if self.open_cursors == 0 {
            for id in std::mem::take(&mut self.retired) {
                self.arena.free(id)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Write-back and consistency
    // ---------------------------------------------------------------

    /// Writes all dirty pages back through the channel, depth-first, and
    /// returns the root's new page number for the session to record.
    pub fn write(&mut self) -> Result<u32> {
        let root = self.root;
        let root_page = self.write_page(root)?;
        self.channel.sync()?;
        Ok(root_page)
    }

    fn write_page(&mut self, id: PageId) -> Result<u32> {
        let loaded_children: Vec<(usize, PageId)> = match &self.arena.get(id)?.data {
            PageData::Inner { children, .. } => children
                .iter()
                .enumerate()
                .filter_map(|(slot, child)| child.map(|c| (slot, c)))
                .collect(),
            PageData::Leaf { .. } => Vec::new(),
        };

        for (slot, child) in loaded_children {
            let child_page = self.write_page(child)?;
            let page = self.arena.get_mut(id)?;
            if let PageData::Inner { child_pages, .. } = &mut page.data {
                if child_pages[slot] != child_page {
                    child_pages[slot] = child_page;
                    page.dirty = true;
                }
            }
        }

        if !self.arena.get(id)?.dirty {
            return Ok(self.arena.get(id)?.disk_page);
        }

        // Dirty pages always get a fresh page number; prior images are
        // left intact for concurrently open cursors and crash recovery.
        let page_no = self.channel.allocate_page()?;
        self.channel.seek_page(page_no)?;
        self.arena.get(id)?.write_to(&mut self.channel)?;

        let page = self.arena.get_mut(id)?;
        page.disk_page = page_no;
        page.dirty = false;
        self.pages_written += 1;
        Ok(page_no)
    }

    /// Full consistency walk: checks key ordering, separator bounds and
    /// occupancy limits on every reachable page, loading the whole tree.
    /// Returns the number of live entries.
    pub fn validate(&mut self) -> Result<u64> {
        let root = self.root;
        let mut count = 0;
        self.validate_page(root, None, None, true, &mut count)?;
        Ok(count)
    }

    fn validate_page(
        &mut self,
        id: PageId,
        lower: Option<i64>,
        upper: Option<i64>,
        is_root: bool,
        count: &mut u64,
    ) -> Result<()> {
        enum Shape {
            Leaf,
            Inner(usize),
        }

        let shape = {
            let page = self.arena.get(id)?;
            match &page.data {
                PageData::Leaf { keys, values } => {
                    ensure!(
                        keys.len() == values.len(),
                        "leaf {:?} has {} keys but {} values",
                        id,
                        keys.len(),
                        values.len()
                    );
                    ensure!(
                        keys.len() <= self.max_leaf_entries,
                        "leaf {:?} overflows: {} > {}",
                        id,
                        keys.len(),
                        self.max_leaf_entries
                    );
                    ensure!(
                        is_root || !keys.is_empty(),
                        "non-root leaf {:?} is empty",
                        id
                    );
                    for window in keys.windows(2) {
                        ensure!(
                            window[0] < window[1],
                            "leaf {:?} keys out of order: {} >= {}",
                            id,
                            window[0],
                            window[1]
                        );
                    }
                    if let (Some(lo), Some(&first)) = (lower, keys.first()) {
                        ensure!(first >= lo, "leaf {:?} key {} below bound {}", id, first, lo);
                    }
                    if let (Some(hi), Some(&last)) = (upper, keys.last()) {
                        ensure!(last < hi, "leaf {:?} key {} above bound {}", id, last, hi);
                    }
                    *count += keys.len() as u64;
                    Shape::Leaf
                }
                PageData::Inner { keys, children, child_pages } => {
                    ensure!(
                        !keys.is_empty(),
                        "inner {:?} has no separator keys",
                        id
                    );
                    ensure!(
                        children.len() == keys.len() + 1 && child_pages.len() == children.len(),
                        "inner {:?} has {} keys but {} children",
                        id,
                        keys.len(),
                        children.len()
                    );
                    ensure!(
                        keys.len() <= self.max_inner_entries,
                        "inner {:?} overflows: {} > {}",
                        id,
                        keys.len(),
                        self.max_inner_entries
                    );
                    for window in keys.windows(2) {
                        ensure!(
                            window[0] < window[1],
                            "inner {:?} separators out of order",
                            id
                        );
                    }
                    Shape::Inner(children.len())
                }
            }
        };

        if let Shape::Inner(child_count) = shape {
            for slot in 0..child_count {
                let child = self.read_or_create_page(id, slot)?;
                {
                    let child_parent = self.arena.get(child)?.parent;
                    ensure!(
                        child_parent == Some(id),
                        "child {:?} parent link does not point at {:?}",
                        child,
                        id
                    );
                }
                let (child_lower, child_upper) = {
                    let page = self.arena.get(id)?;
                    let PageData::Inner { keys, .. } = &page.data else {
                        unreachable!()
                    };
                    let lo = if slot == 0 { lower } else { Some(keys[slot - 1]) };
                    let hi = if slot == keys.len() { upper } else { Some(keys[slot]) };
                    (lo, hi)
                };
                self.validate_page(child, child_lower, child_upper, false, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MmapChannel;
    use tempfile::NamedTempFile;

    fn small_index() -> (LongLongIndex<MmapChannel>, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let channel = MmapChannel::create(temp.path(), 4096).unwrap();
        let index = LongLongIndex::create_with_order(channel, 8, 8).unwrap();
        (index, temp)
    }

    #[test]
    fn insert_and_find_single_leaf() {
        let (mut index, _temp) = small_index();

        index.add_long(5, 50).unwrap();
        index.add_long(1, 10).unwrap();
        index.add_long(3, 30).unwrap();

        assert_eq!(index.find_value(1).unwrap(), Some(10));
        assert_eq!(index.find_value(3).unwrap(), Some(30));
        assert_eq!(index.find_value(5).unwrap(), Some(50));
        assert_eq!(index.find_value(4).unwrap(), None);
    }

    #[test]
    fn overwrite_updates_value_in_place() {
        let (mut index, _temp) = small_index();

        index.add_long(7, 70).unwrap();
        index.add_long(7, 71).unwrap();

        assert_eq!(index.find_value(7).unwrap(), Some(71));
        assert_eq!(index.validate().unwrap(), 1);
    }

    #[test]
    fn splits_build_a_multi_level_tree() {
        let (mut index, _temp) = small_index();

        for key in 0..500 {
            index.add_long(key, key * 10).unwrap();
        }

        assert_eq!(index.validate().unwrap(), 500);
        for key in 0..500 {
            assert_eq!(index.find_value(key).unwrap(), Some(key * 10));
        }
        assert!(index.leaf_count() > 1);
    }

    #[test]
    fn reverse_insertion_order_is_handled() {
        let (mut index, _temp) = small_index();

        for key in (0..300).rev() {
            index.add_long(key, -key).unwrap();
        }

        assert_eq!(index.validate().unwrap(), 300);
        for key in 0..300 {
            assert_eq!(index.find_value(key).unwrap(), Some(-key));
        }
    }

    #[test]
    fn remove_returns_presence() {
        let (mut index, _temp) = small_index();

        index.add_long(1, 10).unwrap();

        assert!(index.remove_long(1).unwrap());
        assert!(!index.remove_long(1).unwrap());
        assert_eq!(index.find_value(1).unwrap(), None);
    }

    #[test]
    fn remove_everything_leaves_an_empty_tree() {
        let (mut index, _temp) = small_index();

        for key in 0..200 {
            index.add_long(key, key).unwrap();
        }
        for key in 0..200 {
            assert!(index.remove_long(key).unwrap(), "key {} missing", key);
        }

        assert_eq!(index.validate().unwrap(), 0);
        assert_eq!(index.max_key().unwrap(), i64::MIN);
        for key in 0..200 {
            assert_eq!(index.find_value(key).unwrap(), None);
        }
    }

    #[test]
    fn interleaved_adds_and_removes_conserve_count() {
        let (mut index, _temp) = small_index();

        // Deterministic LCG so the interleaving is reproducible.
        let mut state: u64 = 0x2545F4914F6CDD1D;
        let mut next_rand = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as i64
        };

        let mut live = std::collections::BTreeSet::new();
        for _ in 0..5000 {
            let key = next_rand() % 600;
            if next_rand() % 3 == 0 {
                let removed = index.remove_long(key).unwrap();
                assert_eq!(removed, live.remove(&key));
            } else {
                index.add_long(key, key * 2).unwrap();
                live.insert(key);
            }
        }

        assert_eq!(index.validate().unwrap(), live.len() as u64);
        for &key in &live {
            assert_eq!(index.find_value(key).unwrap(), Some(key * 2));
        }
    }

    #[test]
    fn max_key_follows_rightmost_path() {
        let (mut index, _temp) = small_index();

        assert_eq!(index.max_key().unwrap(), i64::MIN);

        for key in [4, 900, 12, -3, 77] {
            index.add_long(key, 0).unwrap();
        }
        assert_eq!(index.max_key().unwrap(), 900);

        index.remove_long(900).unwrap();
        assert_eq!(index.max_key().unwrap(), 77);
    }

    #[test]
    fn negative_keys_sort_before_positive() {
        let (mut index, _temp) = small_index();

        index.add_long(-100, 1).unwrap();
        index.add_long(0, 2).unwrap();
        index.add_long(100, 3).unwrap();

        let mut cursor = index.iterator(i64::MIN, i64::MAX).unwrap();
        let mut keys = Vec::new();
        while cursor.has_next(&mut index).unwrap() {
            keys.push(cursor.next(&mut index).unwrap().key);
        }
        cursor.close(&mut index).unwrap();

        assert_eq!(keys, vec![-100, 0, 100]);
    }

    #[test]
    fn write_back_assigns_fresh_pages_and_reopens() {
        let temp = NamedTempFile::new().unwrap();
        let channel = MmapChannel::create(temp.path(), 4096).unwrap();
        let mut index = LongLongIndex::create_with_order(channel, 8, 8).unwrap();

        for key in 0..100 {
            index.add_long(key, key + 1000).unwrap();
        }
        let root_page = index.write().unwrap();
        index.channel_mut().set_root_page(root_page).unwrap();
        assert!(index.pages_written() > 0);
        drop(index);

        let channel = MmapChannel::open(temp.path()).unwrap();
        let root_page = channel.root_page().unwrap();
        let mut reopened =
            LongLongIndex::open_with_order(channel, root_page, 8, 8).unwrap();
        assert_eq!(reopened.validate().unwrap(), 100);
        for key in 0..100 {
            assert_eq!(reopened.find_value(key).unwrap(), Some(key + 1000));
        }
    }

    #[test]
    fn clean_pages_are_not_rewritten() {
        let (mut index, _temp) = small_index();

        for key in 0..50 {
            index.add_long(key, key).unwrap();
        }
        index.write().unwrap();
        let written = index.pages_written();

        index.write().unwrap();
        assert_eq!(index.pages_written(), written);
    }

    #[test]
    fn prefix_deletion_keeps_every_inner_page_keyed() {
        let (mut index, _temp) = small_index();

        for key in 1..=120 {
            index.add_long(key, key).unwrap();
        }
        // validate() rejects keyless inner pages, so checking after every
        // removal catches any step that strands a single-child page.
        for key in 1..=119 {
            assert!(index.remove_long(key).unwrap());
            assert_eq!(index.validate().unwrap(), (120 - key) as u64, "after key {}", key);
        }
    }

    #[test]
    fn merge_heuristic_keeps_tree_valid() {
        let (mut index, _temp) = small_index();

        for key in 1..=100 {
            index.add_long(key, key).unwrap();
        }
        for key in 50..=90 {
            assert!(index.remove_long(key).unwrap());
        }

        assert_eq!(index.validate().unwrap(), 59);
        for key in 1..=100 {
            let expected = if (50..=90).contains(&key) { None } else { Some(key) };
            assert_eq!(index.find_value(key).unwrap(), expected, "key {}", key);
        }
    }
}
