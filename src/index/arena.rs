//! # Page Arena
//!
//! Slab of in-memory pages addressed by stable `PageId`s. Freed slots are
//! recycled through a free list, so ids handed out earlier stay valid for
//! as long as their page lives. All parent/child and cursor references in
//! the index are `PageId`s into this arena; nothing holds a live reference
//! across mutations, which is what makes copy-on-write substitution a
//! simple id rebind.

use eyre::{ensure, Result};

use super::page::{Page, PageId};

#[derive(Debug, Default)]
pub(crate) struct PageArena {
    slots: Vec<Option<Page>>,
    free: Vec<u32>,
}

impl PageArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, page: Page) -> PageId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(page);
                PageId(slot)
            }
            None => {
                self.slots.push(Some(page));
                PageId((self.slots.len() - 1) as u32)
            }
        }
    }

    pub(crate) fn get(&self, id: PageId) -> Result<&Page> {
        match self.slots.get(id.index()) {
            Some(Some(page)) => Ok(page),
            _ => eyre::bail!("dangling page id {:?}", id),
        }
    }

    pub(crate) fn get_mut(&mut self, id: PageId) -> Result<&mut Page> {
        match self.slots.get_mut(id.index()) {
            Some(slot @ Some(_)) => Ok(slot.as_mut().unwrap()),
            _ => eyre::bail!("dangling page id {:?}", id),
        }
    }

    pub(crate) fn free(&mut self, id: PageId) -> Result<()> {
        ensure!(
            id.index() < self.slots.len() && self.slots[id.index()].is_some(),
            "double free of page id {:?}",
            id
        );
        self.slots[id.index()] = None;
        self.free.push(id.0);
        Ok(())
    }

    /// Number of live pages in the arena.
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
