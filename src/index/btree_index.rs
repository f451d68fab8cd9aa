use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::RwLock;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    BTreeConfig, CinderError, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::HeaderPage;

use super::btree_page::{BTreePage, InternalNode, LeafNode, PageType};
use super::context::Context;
use super::{BTreeIterator, KeyComparator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Insert,
    Remove,
}

/// A disk-resident B+Tree mapping fixed-width keys to record ids.
///
/// Every node lives in one buffer pool page. Readers crab down with shared
/// page latches. Writers take the whole-tree latch and exclusive page latches,
/// and give up everything above a node once that node is safe, meaning
/// the operation cannot split or merge it.
///
/// The root page id of each named index is recorded in the header page and
/// rewritten on every root change, so an index can be reopened by name.
pub struct BPlusTree {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    config: BTreeConfig,
    /// Whole-tree latch guarding the root page id
    root: RwLock<PageId>,
}

impl BPlusTree {
    /// Opens the index called `name`, creating an empty one if the header
    /// page has no record of it.
    pub fn new(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        config: BTreeConfig,
    ) -> Result<Self> {
        Self::open_with(name, bpm, comparator, config, true)
    }

    /// Creates a new empty index, failing if `name` is already recorded.
    pub fn create(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        config: BTreeConfig,
    ) -> Result<Self> {
        Self::open_with(name, bpm, comparator, config, false)
    }

    fn open_with(
        name: &str,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        config: BTreeConfig,
        reopen: bool,
    ) -> Result<Self> {
        config.validate()?;

        let root_page_id = {
            let mut guard = bpm.fetch_page_write(HEADER_PAGE_ID)?;
            let existing = {
                let header = HeaderPage::new(guard.data());
                if header.is_valid() {
                    header.get_root_id(name)
                } else if guard.data().iter().any(|&b| b != 0) {
                    return Err(CinderError::InvalidDatabaseFile);
                } else {
                    None
                }
            };

            match existing {
                Some(_) if !reopen => return Err(CinderError::IndexAlreadyExists(name.to_string())),
                Some(root) => root,
                None => {
                    let mut header = HeaderPage::new(guard.data_mut());
                    if !header.is_valid() {
                        header.init();
                    }
                    header.insert_record(name, INVALID_PAGE_ID)?;
                    INVALID_PAGE_ID
                }
            }
        };

        if root_page_id.is_valid() {
            let guard = bpm.fetch_page_read(root_page_id)?;
            let key_size = BTreePage::new(guard.data()).key_size();
            if key_size != config.key_size {
                return Err(CinderError::InvalidConfig(format!(
                    "index {} stores {}-byte keys, configured for {}",
                    name, key_size, config.key_size
                )));
            }
        }

        debug!("Opened index {} with root {}", name, root_page_id);
        Ok(Self {
            index_name: name.to_string(),
            bpm,
            comparator,
            config,
            root: RwLock::new(root_page_id),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn config(&self) -> &BTreeConfig {
        &self.config
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    pub(super) fn buffer_pool(&self) -> &BufferPoolManager {
        &self.bpm
    }

    pub(super) fn comparator(&self) -> &dyn KeyComparator {
        self.comparator.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.config.key_size {
            return Err(CinderError::InvalidKeySize {
                expected: self.config.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn corrupted(page_id: PageId, what: &str) -> CinderError {
        CinderError::IndexCorrupted(format!("{}: {}", page_id, what))
    }

    /// Returns the record ids stored under `key` (at most one, keys are unique).
    pub fn get_value(&self, key: &[u8]) -> Result<Vec<RecordId>> {
        self.check_key(key)?;
        let Some(guard) = self.find_leaf_read(Some(key))? else {
            return Ok(Vec::new());
        };
        let leaf = LeafNode::new(guard.data());
        Ok(leaf
            .lookup(key, self.comparator.as_ref())
            .into_iter()
            .collect())
    }

    /// Descends with shared latches to the leaf that would hold `key`, or to
    /// the leftmost leaf when `key` is None.
    pub(super) fn find_leaf_read(&self, key: Option<&[u8]>) -> Result<Option<ReadPageGuard<'_>>> {
        let root_latch = self.root.read();
        if !root_latch.is_valid() {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(*root_latch)?;
        drop(root_latch);

        loop {
            let child = {
                let page = BTreePage::new(guard.data());
                if !page.is_well_formed() || page.key_size() != self.config.key_size {
                    return Err(Self::corrupted(guard.page_id(), "malformed node header"));
                }
                match page.page_type() {
                    PageType::Leaf => None,
                    PageType::Internal => {
                        let node = InternalNode::new(guard.data());
                        Some(match key {
                            Some(key) => node.lookup(key, self.comparator.as_ref()),
                            None => node.value_at(0),
                        })
                    }
                    PageType::Invalid => {
                        return Err(Self::corrupted(guard.page_id(), "not a tree page"))
                    }
                }
            };

            match child {
                // The child is latched before the parent guard is replaced
                Some(child) => guard = self.bpm.fetch_page_read(child)?,
                None => return Ok(Some(guard)),
            }
        }
    }

    fn is_safe<B: AsRef<[u8]>>(&self, page: &BTreePage<B>, op: Operation, is_root: bool) -> bool {
        let size = page.size();
        match (op, page.is_leaf()) {
            (Operation::Insert, true) => size < self.config.leaf_max_size,
            (Operation::Insert, false) => size < self.config.internal_max_size,
            (Operation::Remove, true) if is_root => size > 1,
            (Operation::Remove, false) if is_root => size > 2,
            (Operation::Remove, true) => size > self.config.leaf_min_size(),
            (Operation::Remove, false) => size > self.config.internal_min_size(),
        }
    }

    /// Descends with exclusive latches to the leaf for `key`, retaining the
    /// path from the lowest unsafe ancestor in `ctx`. Returns the leaf guard.
    fn find_leaf_write<'a>(
        &'a self,
        ctx: &mut Context<'a>,
        root_id: PageId,
        key: &[u8],
        op: Operation,
    ) -> Result<WritePageGuard<'a>> {
        let mut page_id = root_id;
        loop {
            let guard = self.bpm.fetch_page_write(page_id)?;
            let (safe, child) = {
                let page = BTreePage::new(guard.data());
                let safe = self.is_safe(&page, op, page_id == root_id);
                match page.page_type() {
                    PageType::Leaf => (safe, None),
                    PageType::Internal => {
                        let node = InternalNode::new(guard.data());
                        (safe, Some(node.lookup(key, self.comparator.as_ref())))
                    }
                    PageType::Invalid => return Err(Self::corrupted(page_id, "not a tree page")),
                }
            };

            if safe {
                ctx.release_ancestors();
            }
            match child {
                Some(child) => {
                    ctx.write_set.push_back(guard);
                    page_id = child;
                }
                None => return Ok(guard),
            }
        }
    }

    fn set_parent(&self, child: PageId, parent: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(child)?;
        BTreePage::new(guard.data_mut()).set_parent_page_id(parent);
        Ok(())
    }

    /// Installs a new root. Only legal while the tree latch is still held.
    fn set_root(&self, ctx: &mut Context<'_>, root_id: PageId) -> Result<()> {
        let Some(root_guard) = ctx.root_guard.as_mut() else {
            return Err(Self::corrupted(root_id, "root changed without the tree latch"));
        };
        **root_guard = root_id;
        self.update_header(root_id)?;
        debug!("Index {} root is now {}", self.index_name, root_id);
        Ok(())
    }

    fn update_header(&self, root_id: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_id) {
            header.insert_record(&self.index_name, root_id)?;
        }
        Ok(())
    }

    /// Inserts a unique key. Returns false if the key is already present.
    ///
    /// Running out of frames while splitting fails the whole call with
    /// `BufferPoolFull`; nodes split before the failure stay split.
    pub fn insert(&self, key: &[u8], value: RecordId) -> Result<bool> {
        self.check_key(key)?;
        let root_latch = self.root.write();
        let root_id = *root_latch;
        let mut ctx = Context::new(root_latch);

        if !root_id.is_valid() {
            self.start_new_tree(&mut ctx, key, value)?;
            return Ok(true);
        }

        let mut leaf_guard = self.find_leaf_write(&mut ctx, root_id, key, Operation::Insert)?;
        let comparator = self.comparator.as_ref();
        let (index, size) = {
            let leaf = LeafNode::new(leaf_guard.data());
            let index = leaf.key_index(key, comparator);
            if index < leaf.size() && comparator.compare(leaf.key_at(index), key) == Ordering::Equal
            {
                return Ok(false);
            }
            (index, leaf.size())
        };

        if size < self.config.leaf_max_size {
            LeafNode::new(leaf_guard.data_mut()).insert_at(index, key, value);
            return Ok(true);
        }

        self.split_leaf(&mut ctx, leaf_guard, index, key, value)?;
        Ok(true)
    }

    fn start_new_tree(&self, ctx: &mut Context<'_>, key: &[u8], value: RecordId) -> Result<()> {
        let mut guard = self.bpm.new_page()?.upgrade_write();
        let page_id = guard.page_id();
        {
            let mut leaf = LeafNode::new(guard.data_mut());
            leaf.init(
                page_id,
                INVALID_PAGE_ID,
                self.config.key_size,
                self.config.leaf_max_size,
            );
            leaf.insert_at(0, key, value);
        }
        drop(guard);
        self.set_root(ctx, page_id)
    }

    /// Splits a full leaf around the new entry: the left node keeps the lower
    /// half, the new right sibling the rest and the old next-leaf link.
    fn split_leaf<'a>(
        &'a self,
        ctx: &mut Context<'a>,
        mut leaf_guard: WritePageGuard<'a>,
        index: usize,
        key: &[u8],
        value: RecordId,
    ) -> Result<()> {
        let (mut entries, parent_id, next_id) = {
            let leaf = LeafNode::new(leaf_guard.data());
            (leaf.entries(), leaf.parent_page_id(), leaf.next_page_id())
        };
        entries.insert(index, (key.to_vec(), value));

        let mut new_guard = self.bpm.new_page()?.upgrade_write();
        let new_id = new_guard.page_id();
        let right = entries.split_off(entries.len() / 2);
        let separator = right[0].0.clone();

        {
            let mut node = LeafNode::new(new_guard.data_mut());
            node.init(
                new_id,
                parent_id,
                self.config.key_size,
                self.config.leaf_max_size,
            );
            node.set_entries(&right);
            node.set_next_page_id(next_id);
        }
        {
            let mut node = LeafNode::new(leaf_guard.data_mut());
            node.set_entries(&entries);
            node.set_next_page_id(new_id);
        }

        debug!("Split leaf {} into {}", leaf_guard.page_id(), new_id);
        self.insert_into_parent(ctx, leaf_guard, separator, new_guard)
    }

    /// Links a freshly split `right` next to `left` in their parent, splitting
    /// the parent in turn if it is full, up to a new root.
    fn insert_into_parent<'a>(
        &'a self,
        ctx: &mut Context<'a>,
        mut left: WritePageGuard<'a>,
        key: Vec<u8>,
        mut right: WritePageGuard<'a>,
    ) -> Result<()> {
        let left_id = left.page_id();
        let right_id = right.page_id();
        let parent_id = BTreePage::new(left.data()).parent_page_id();

        if !parent_id.is_valid() {
            if !ctx.holds_root_latch() {
                return Err(Self::corrupted(left_id, "root split without the tree latch"));
            }
            let mut root_guard = self.bpm.new_page()?.upgrade_write();
            let root_id = root_guard.page_id();
            {
                let mut root = InternalNode::new(root_guard.data_mut());
                root.init(
                    root_id,
                    INVALID_PAGE_ID,
                    self.config.key_size,
                    self.config.internal_max_size,
                );
                root.populate_new_root(left_id, &key, right_id);
            }
            BTreePage::new(left.data_mut()).set_parent_page_id(root_id);
            BTreePage::new(right.data_mut()).set_parent_page_id(root_id);
            drop(left);
            drop(right);
            drop(root_guard);
            return self.set_root(ctx, root_id);
        }

        // Children are released before touching the level above
        drop(left);
        drop(right);

        let Some(mut parent_guard) = ctx.write_set.pop_back() else {
            return Err(Self::corrupted(parent_id, "parent latch not held"));
        };
        if parent_guard.page_id() != parent_id {
            return Err(Self::corrupted(parent_id, "latched path does not match parent"));
        }

        let (index, size) = {
            let parent = InternalNode::new(parent_guard.data());
            let Some(index) = parent.value_index(left_id) else {
                return Err(Self::corrupted(parent_id, "split child missing from parent"));
            };
            (index, parent.size())
        };

        if size < self.config.internal_max_size {
            InternalNode::new(parent_guard.data_mut()).insert_at(index + 1, &key, right_id);
            return Ok(());
        }

        let (mut entries, grandparent_id) = {
            let parent = InternalNode::new(parent_guard.data());
            (parent.entries(), parent.parent_page_id())
        };
        entries.insert(index + 1, (key, right_id));

        let mut new_guard = self.bpm.new_page()?.upgrade_write();
        let new_id = new_guard.page_id();
        let moved = entries.split_off(entries.len() / 2);
        let separator = moved[0].0.clone();

        {
            let mut node = InternalNode::new(new_guard.data_mut());
            node.init(
                new_id,
                grandparent_id,
                self.config.key_size,
                self.config.internal_max_size,
            );
            node.set_entries(&moved);
        }
        InternalNode::new(parent_guard.data_mut()).set_entries(&entries);
        for (_, child) in &moved {
            self.set_parent(*child, new_id)?;
        }

        debug!("Split internal {} into {}", parent_id, new_id);
        self.insert_into_parent(ctx, parent_guard, separator, new_guard)
    }

    /// Deletes `key` if present.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        let root_latch = self.root.write();
        let root_id = *root_latch;
        if !root_id.is_valid() {
            return Ok(());
        }
        let mut ctx = Context::new(root_latch);

        let mut leaf_guard = self.find_leaf_write(&mut ctx, root_id, key, Operation::Remove)?;
        let comparator = self.comparator.as_ref();
        let index = {
            let leaf = LeafNode::new(leaf_guard.data());
            let index = leaf.key_index(key, comparator);
            if index >= leaf.size() || comparator.compare(leaf.key_at(index), key) != Ordering::Equal
            {
                return Ok(());
            }
            index
        };
        LeafNode::new(leaf_guard.data_mut()).remove_at(index);

        let mut garbage = Vec::new();
        let result = self.rebalance(&mut ctx, leaf_guard, &mut garbage);
        drop(ctx);

        for page_id in garbage {
            match self.bpm.delete_page(page_id) {
                Ok(true) => trace!("Reclaimed {}", page_id),
                Ok(false) => warn!("{} is still pinned and was not reclaimed", page_id),
                Err(e) => warn!("Failed to reclaim {}: {}", page_id, e),
            }
        }
        result
    }

    /// Restores the occupancy bound of `node` after a removal, coalescing or
    /// redistributing with a sibling and recursing into the parent after a
    /// coalesce. Pages that leave the tree are pushed onto `garbage`.
    fn rebalance<'a>(
        &'a self,
        ctx: &mut Context<'a>,
        node: WritePageGuard<'a>,
        garbage: &mut Vec<PageId>,
    ) -> Result<()> {
        let (is_leaf, size, parent_id) = {
            let page = BTreePage::new(node.data());
            (page.is_leaf(), page.size(), page.parent_page_id())
        };
        if !parent_id.is_valid() {
            return self.adjust_root(ctx, node, garbage);
        }

        let (min_size, max_size) = if is_leaf {
            (self.config.leaf_min_size(), self.config.leaf_max_size)
        } else {
            (self.config.internal_min_size(), self.config.internal_max_size)
        };
        if size >= min_size {
            return Ok(());
        }

        let Some(mut parent) = ctx.write_set.pop_back() else {
            return Err(Self::corrupted(parent_id, "parent latch not held"));
        };
        if parent.page_id() != parent_id {
            return Err(Self::corrupted(parent_id, "latched path does not match parent"));
        }

        let node_id = node.page_id();
        let (index, sibling_id) = {
            let p = InternalNode::new(parent.data());
            let Some(index) = p.value_index(node_id) else {
                return Err(Self::corrupted(parent_id, "underfull child missing from parent"));
            };
            // Prefer the previous sibling; the first child borrows from the next
            let sibling_index = if index == 0 { 1 } else { index - 1 };
            (index, p.value_at(sibling_index))
        };
        let sibling = self.bpm.fetch_page_write(sibling_id)?;

        let (mut left, mut right, right_index) = if index == 0 {
            (node, sibling, 1)
        } else {
            (sibling, node, index)
        };
        let combined = BTreePage::new(left.data()).size() + BTreePage::new(right.data()).size();

        if combined <= max_size {
            self.coalesce(&mut parent, &mut left, &right, right_index, is_leaf)?;
            garbage.push(right.page_id());
            drop(left);
            drop(right);
            return self.rebalance(ctx, parent, garbage);
        }

        self.redistribute(&mut parent, &mut left, &mut right, right_index, index == 0, is_leaf)
    }

    /// Moves everything in `right` onto the end of `left` and drops the
    /// separator between them from `parent`.
    fn coalesce(
        &self,
        parent: &mut WritePageGuard<'_>,
        left: &mut WritePageGuard<'_>,
        right: &WritePageGuard<'_>,
        right_index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        if is_leaf {
            let (right_entries, right_next) = {
                let node = LeafNode::new(right.data());
                (node.entries(), node.next_page_id())
            };
            let mut node = LeafNode::new(left.data_mut());
            let mut entries = node.entries();
            entries.extend(right_entries);
            node.set_entries(&entries);
            node.set_next_page_id(right_next);
        } else {
            let separator = InternalNode::new(parent.data()).key_at(right_index).to_vec();
            let mut right_entries = InternalNode::new(right.data()).entries();
            // The separator comes down as the key of right's first child
            if let Some(first) = right_entries.first_mut() {
                first.0 = separator;
            }

            let left_id = left.page_id();
            let mut node = InternalNode::new(left.data_mut());
            let mut entries = node.entries();
            entries.extend(right_entries.iter().cloned());
            node.set_entries(&entries);
            for (_, child) in &right_entries {
                self.set_parent(*child, left_id)?;
            }
        }

        InternalNode::new(parent.data_mut()).remove_at(right_index);
        debug!("Merged {} into {}", right.page_id(), left.page_id());
        Ok(())
    }

    /// Moves one entry across the `left`/`right` boundary and rewrites their
    /// separator. With `from_right` the first entry of `right` moves to the
    /// end of `left`, otherwise the last entry of `left` moves to the front of
    /// `right`.
    fn redistribute(
        &self,
        parent: &mut WritePageGuard<'_>,
        left: &mut WritePageGuard<'_>,
        right: &mut WritePageGuard<'_>,
        right_index: usize,
        from_right: bool,
        is_leaf: bool,
    ) -> Result<()> {
        let new_separator = if is_leaf {
            let mut left_entries = LeafNode::new(left.data()).entries();
            let mut right_entries = LeafNode::new(right.data()).entries();
            if from_right {
                left_entries.push(right_entries.remove(0));
            } else {
                let Some(moved) = left_entries.pop() else {
                    return Err(Self::corrupted(left.page_id(), "empty sibling"));
                };
                right_entries.insert(0, moved);
            }
            LeafNode::new(left.data_mut()).set_entries(&left_entries);
            LeafNode::new(right.data_mut()).set_entries(&right_entries);
            right_entries[0].0.clone()
        } else {
            let separator = InternalNode::new(parent.data()).key_at(right_index).to_vec();
            let mut left_entries = InternalNode::new(left.data()).entries();
            let mut right_entries = InternalNode::new(right.data()).entries();

            let (moved_child, new_parent, new_separator) = if from_right {
                let (_, child) = right_entries.remove(0);
                left_entries.push((separator, child));
                (child, left.page_id(), right_entries[0].0.clone())
            } else {
                let Some((key, child)) = left_entries.pop() else {
                    return Err(Self::corrupted(left.page_id(), "empty sibling"));
                };
                right_entries[0].0 = separator;
                right_entries.insert(0, (Vec::new(), child));
                (child, right.page_id(), key)
            };

            InternalNode::new(left.data_mut()).set_entries(&left_entries);
            InternalNode::new(right.data_mut()).set_entries(&right_entries);
            self.set_parent(moved_child, new_parent)?;
            new_separator
        };

        InternalNode::new(parent.data_mut()).set_key_at(right_index, &new_separator);
        debug!(
            "Redistributed between {} and {}",
            left.page_id(),
            right.page_id()
        );
        Ok(())
    }

    /// Shrinks the tree at the top: an internal root with one child hands the
    /// root to that child, an empty leaf root empties the tree.
    fn adjust_root(
        &self,
        ctx: &mut Context<'_>,
        root: WritePageGuard<'_>,
        garbage: &mut Vec<PageId>,
    ) -> Result<()> {
        let root_id = root.page_id();
        let (is_leaf, size) = {
            let page = BTreePage::new(root.data());
            (page.is_leaf(), page.size())
        };

        if is_leaf && size == 0 {
            drop(root);
            garbage.push(root_id);
            self.set_root(ctx, INVALID_PAGE_ID)?;
        } else if !is_leaf && size == 1 {
            let child = InternalNode::new(root.data()).value_at(0);
            drop(root);
            self.set_parent(child, INVALID_PAGE_ID)?;
            garbage.push(root_id);
            self.set_root(ctx, child)?;
        }
        Ok(())
    }

    /// Cursor at the smallest key.
    pub fn begin(&self) -> Result<BTreeIterator<'_>> {
        match self.find_leaf_read(None)? {
            Some(guard) => BTreeIterator::new(self, guard, Bound::Unbounded),
            None => Ok(self.end()),
        }
    }

    /// Cursor at the first key not less than `key`.
    pub fn begin_at(&self, key: &[u8]) -> Result<BTreeIterator<'_>> {
        self.check_key(key)?;
        match self.find_leaf_read(Some(key))? {
            Some(guard) => BTreeIterator::new(self, guard, Bound::Included(key.to_vec())),
            None => Ok(self.end()),
        }
    }

    /// The end-of-tree sentinel.
    pub fn end(&self) -> BTreeIterator<'_> {
        BTreeIterator::end(self)
    }

    /// All entries with `start <= key <= end`, in key order.
    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, RecordId)>> {
        self.check_key(end)?;
        let mut results = Vec::new();
        for entry in self.begin_at(start)? {
            let (key, rid) = entry?;
            if self.comparator.compare(&key, end) == Ordering::Greater {
                break;
            }
            results.push((key, rid));
        }
        Ok(results)
    }

    /// Checks the structural invariants of the whole tree: key order inside
    /// nodes and against separators, occupancy bounds, parent links, uniform
    /// leaf depth and a leaf chain that visits every leaf in order.
    ///
    /// Meant for a quiescent tree; concurrent writers may be reported as
    /// corruption.
    pub fn verify_integrity(&self) -> Result<()> {
        let root_latch = self.root.read();
        let root_id = *root_latch;
        if !root_id.is_valid() {
            return Ok(());
        }

        let mut walk = IntegrityWalk {
            leaf_depth: None,
            leaves: Vec::new(),
        };
        self.verify_node(root_id, INVALID_PAGE_ID, None, None, 0, &mut walk)?;

        for pair in walk.leaves.windows(2) {
            let ((leaf, next), (following, _)) = (pair[0], pair[1]);
            if next != following {
                return Err(Self::corrupted(leaf, "leaf chain skips a leaf"));
            }
        }
        if let Some(&(last, next)) = walk.leaves.last() {
            if next.is_valid() {
                return Err(Self::corrupted(last, "last leaf has a successor"));
            }
        }
        Ok(())
    }

    fn verify_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        walk: &mut IntegrityWalk,
    ) -> Result<()> {
        let guard = self.bpm.fetch_page_read(page_id)?;
        let page = BTreePage::new(guard.data());
        let comparator = self.comparator.as_ref();
        let is_root = !expected_parent.is_valid();

        if page.page_id() != page_id {
            return Err(Self::corrupted(page_id, "page id mismatch"));
        }
        if page.parent_page_id() != expected_parent {
            return Err(Self::corrupted(page_id, "wrong parent link"));
        }
        if page.key_size() != self.config.key_size {
            return Err(Self::corrupted(page_id, "wrong key size"));
        }
        if !page.is_well_formed() {
            return Err(Self::corrupted(page_id, "malformed node header"));
        }

        let size = page.size();
        let keys: Vec<Vec<u8>> = match page.page_type() {
            PageType::Leaf => {
                let min = if is_root { 1 } else { self.config.leaf_min_size() };
                if size < min || size > self.config.leaf_max_size {
                    return Err(Self::corrupted(page_id, "leaf size out of bounds"));
                }
                LeafNode::new(guard.data())
                    .entries()
                    .into_iter()
                    .map(|(key, _)| key)
                    .collect()
            }
            PageType::Internal => {
                let min = if is_root { 2 } else { self.config.internal_min_size() };
                if size < min || size > self.config.internal_max_size {
                    return Err(Self::corrupted(page_id, "internal size out of bounds"));
                }
                let node = InternalNode::new(guard.data());
                (1..size).map(|i| node.key_at(i).to_vec()).collect()
            }
            PageType::Invalid => return Err(Self::corrupted(page_id, "not a tree page")),
        };

        for pair in keys.windows(2) {
            if comparator.compare(&pair[0], &pair[1]) != Ordering::Less {
                return Err(Self::corrupted(page_id, "keys out of order"));
            }
        }
        if let (Some(lower), Some(first)) = (lower, keys.first()) {
            if comparator.compare(first, lower) == Ordering::Less {
                return Err(Self::corrupted(page_id, "key below separator"));
            }
        }
        if let (Some(upper), Some(last)) = (upper, keys.last()) {
            if comparator.compare(last, upper) != Ordering::Less {
                return Err(Self::corrupted(page_id, "key above separator"));
            }
        }

        if page.is_leaf() {
            if *walk.leaf_depth.get_or_insert(depth) != depth {
                return Err(Self::corrupted(page_id, "leaves at different depths"));
            }
            walk.leaves
                .push((page_id, LeafNode::new(guard.data()).next_page_id()));
            return Ok(());
        }

        let children = InternalNode::new(guard.data()).entries();
        for (i, (_, child)) in children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(keys[i - 1].as_slice()) };
            let child_upper = if i + 1 < size { Some(keys[i].as_slice()) } else { upper };
            self.verify_node(*child, page_id, child_lower, child_upper, depth + 1, walk)?;
        }
        Ok(())
    }
}

struct IntegrityWalk {
    leaf_depth: Option<usize>,
    /// (leaf, its next link) in left-to-right order
    leaves: Vec<(PageId, PageId)>,
}
