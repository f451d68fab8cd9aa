use std::cmp::Ordering;
use std::ops::Bound;

use log::debug;

use crate::buffer::ReadPageGuard;
use crate::common::{CinderError, PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::{BTreePage, LeafNode, PageType};
use super::BPlusTree;

/// Consecutive re-descents allowed before the cursor gives up on a leaf chain
const MAX_RESTARTS: usize = 8;

/// Forward cursor over the leaf chain of a `BPlusTree`.
///
/// The cursor keeps a shared latch on the leaf it points into. Moving past
/// the end of a leaf releases it before the next leaf is latched, so at most
/// one leaf is held at a time and writers can restructure the tree between
/// two leaves.
///
/// The cursor remembers the last key it moved past and only ever yields keys
/// above it, so entries come out in strictly ascending order even while the
/// tree changes. When the next leaf turns out to have been merged away or
/// reclaimed, the cursor descends again from the root to the leaf holding
/// that key. Entries inserted or moved behind the cursor during the scan may
/// be missed.
pub struct BTreeIterator<'a> {
    tree: &'a BPlusTree,
    guard: Option<ReadPageGuard<'a>>,
    page_id: PageId,
    index: usize,
    /// Keys not past this bound are skipped
    bound: Bound<Vec<u8>>,
}

impl<'a> BTreeIterator<'a> {
    /// Positions the cursor at the first entry of the latched leaf within
    /// `bound`, moving on to the following leaves if there is none.
    pub(crate) fn new(
        tree: &'a BPlusTree,
        guard: ReadPageGuard<'a>,
        bound: Bound<Vec<u8>>,
    ) -> Result<Self> {
        let mut iter = Self::end(tree);
        iter.bound = bound;
        iter.enter(guard);
        iter.skip_exhausted_leaves()?;
        Ok(iter)
    }

    /// The end-of-tree sentinel.
    pub(crate) fn end(tree: &'a BPlusTree) -> Self {
        Self {
            tree,
            guard: None,
            page_id: INVALID_PAGE_ID,
            index: 0,
            bound: Bound::Unbounded,
        }
    }

    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }

    /// The entry under the cursor, or None at the end.
    pub fn current(&self) -> Option<(Vec<u8>, RecordId)> {
        let guard = self.guard.as_ref()?;
        let leaf = LeafNode::new(guard.data());
        (self.index < leaf.size())
            .then(|| (leaf.key_at(self.index).to_vec(), leaf.value_at(self.index)))
    }

    /// Moves to the next entry. Advancing the end sentinel does nothing.
    pub fn advance(&mut self) -> Result<()> {
        let Some(guard) = self.guard.as_ref() else {
            return Ok(());
        };
        let leaf = LeafNode::new(guard.data());
        if self.index < leaf.size() {
            self.bound = Bound::Excluded(leaf.key_at(self.index).to_vec());
        }
        self.index += 1;
        self.skip_exhausted_leaves()
    }

    /// Latches `guard` as the current leaf, positioned at its first entry
    /// past the bound.
    fn enter(&mut self, guard: ReadPageGuard<'a>) {
        let leaf = LeafNode::new(guard.data());
        let comparator = self.tree.comparator();
        self.index = match &self.bound {
            Bound::Unbounded => 0,
            Bound::Included(key) => leaf.key_index(key, comparator),
            Bound::Excluded(key) => {
                let index = leaf.key_index(key, comparator);
                let at_key = index < leaf.size()
                    && comparator.compare(leaf.key_at(index), key) == Ordering::Equal;
                if at_key {
                    index + 1
                } else {
                    index
                }
            }
        };
        self.page_id = guard.page_id();
        self.guard = Some(guard);
    }

    fn release(&mut self) {
        self.guard = None;
        self.page_id = INVALID_PAGE_ID;
        self.index = 0;
    }

    /// Whether the page latched as `expected` is still a leaf of this tree.
    fn is_live_leaf(&self, guard: &ReadPageGuard<'_>, expected: PageId) -> bool {
        let page = BTreePage::new(guard.data());
        page.page_type() == PageType::Leaf
            && page.page_id() == expected
            && page.is_well_formed()
            && page.key_size() == self.tree.config().key_size
    }

    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        let mut restarts = 0;
        loop {
            let next = match self.guard.as_ref() {
                None => return Ok(()),
                Some(guard) => {
                    let leaf = LeafNode::new(guard.data());
                    if self.index < leaf.size() {
                        return Ok(());
                    }
                    leaf.next_page_id()
                }
            };

            self.release();
            if !next.is_valid() {
                return Ok(());
            }

            let guard = self.tree.buffer_pool().fetch_page_read(next)?;
            if self.is_live_leaf(&guard, next) {
                self.enter(guard);
                continue;
            }
            drop(guard);

            restarts += 1;
            if restarts > MAX_RESTARTS {
                return Err(CinderError::IndexCorrupted(format!(
                    "{}: leaf chain does not lead to a live leaf",
                    next
                )));
            }
            debug!("{} left the leaf chain, descending again", next);

            let key = match &self.bound {
                Bound::Included(key) | Bound::Excluded(key) => Some(key.as_slice()),
                Bound::Unbounded => None,
            };
            match self.tree.find_leaf_read(key)? {
                Some(guard) => self.enter(guard),
                None => return Ok(()),
            }
        }
    }
}

impl PartialEq for BTreeIterator<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}

impl Iterator for BTreeIterator<'_> {
    type Item = Result<(Vec<u8>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.current()?;
        Some(self.advance().map(|_| item))
    }
}
