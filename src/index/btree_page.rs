//! On-page layout of B+Tree nodes.
//!
//! Every node starts with a 24-byte header:
//!
//! | offset | field        | type |
//! |--------|--------------|------|
//! | 0      | page type    | u8   |
//! | 2      | key size     | u16  |
//! | 4      | size         | u32  |
//! | 8      | max size     | u32  |
//! | 12     | page id      | u32  |
//! | 16     | parent id    | u32  |
//! | 20     | next leaf id | u32  |
//!
//! followed by fixed-width slots. A leaf slot is `key | page id (u32) | slot
//! id (u16)`, an internal slot is `key | child page id (u32)`. The key of
//! internal slot 0 is unused.
//!
//! The views are generic over the buffer: `&[u8]` for reading, `&mut [u8]`
//! (or anything `AsMut<[u8]>`) for writing.

use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

use bytes::{Buf, BufMut};

use crate::common::{
    PageId, RecordId, SlotId, BTREE_PAGE_HEADER_SIZE, CHILD_POINTER_SIZE, INVALID_PAGE_ID,
    PAGE_SIZE, RECORD_ID_SIZE,
};

use super::KeyComparator;

const PAGE_TYPE_OFFSET: usize = 0;
const KEY_SIZE_OFFSET: usize = 2;
const SIZE_OFFSET: usize = 4;
const MAX_SIZE_OFFSET: usize = 8;
const PAGE_ID_OFFSET: usize = 12;
const PARENT_PAGE_OFFSET: usize = 16;
const NEXT_PAGE_OFFSET: usize = 20;

/// A (key, record) pair copied out of a leaf
pub type LeafEntry = (Vec<u8>, RecordId);
/// A (separator, child) pair copied out of an internal node
pub type InternalEntry = (Vec<u8>, PageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid,
    Leaf,
    Internal,
}

impl PageType {
    fn from_u8(tag: u8) -> Self {
        match tag {
            1 => PageType::Leaf,
            2 => PageType::Internal,
            _ => PageType::Invalid,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PageType::Invalid => 0,
            PageType::Leaf => 1,
            PageType::Internal => 2,
        }
    }
}

/// Header fields shared by leaf and internal nodes.
pub struct BTreePage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> BTreePage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    fn get_u32(&self, offset: usize) -> u32 {
        (&self.data.as_ref()[offset..offset + 4]).get_u32_le()
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_u8(self.data.as_ref()[PAGE_TYPE_OFFSET])
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type() == PageType::Leaf
    }

    pub fn key_size(&self) -> usize {
        (&self.data.as_ref()[KEY_SIZE_OFFSET..KEY_SIZE_OFFSET + 2]).get_u16_le() as usize
    }

    pub fn size(&self) -> usize {
        self.get_u32(SIZE_OFFSET) as usize
    }

    pub fn max_size(&self) -> usize {
        self.get_u32(MAX_SIZE_OFFSET) as usize
    }

    /// Smallest size a non-root node may have.
    pub fn min_size(&self) -> usize {
        self.max_size().div_ceil(2)
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.get_u32(PAGE_ID_OFFSET))
    }

    /// `INVALID_PAGE_ID` for the root.
    pub fn parent_page_id(&self) -> PageId {
        PageId::new(self.get_u32(PARENT_PAGE_OFFSET))
    }

    pub fn is_root(&self) -> bool {
        !self.parent_page_id().is_valid()
    }

    /// Whether the header describes a leaf or internal node whose slots,
    /// up to both `size()` and `max_size()`, lie inside the page. Pages that
    /// fail this check must not be read through a node view.
    pub fn is_well_formed(&self) -> bool {
        let pointer_size = match self.page_type() {
            PageType::Leaf => RECORD_ID_SIZE,
            PageType::Internal => CHILD_POINTER_SIZE,
            PageType::Invalid => return false,
        };
        let key_size = self.key_size();
        if key_size == 0 {
            return false;
        }
        let capacity = (PAGE_SIZE - BTREE_PAGE_HEADER_SIZE) / (key_size + pointer_size);
        self.size() <= capacity && self.max_size() <= capacity
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BTreePage<B> {
    fn put_u32(&mut self, offset: usize, value: u32) {
        (&mut self.data.as_mut()[offset..offset + 4]).put_u32_le(value);
    }

    fn init_header(
        &mut self,
        page_type: PageType,
        page_id: PageId,
        parent_id: PageId,
        key_size: usize,
        max_size: usize,
    ) {
        self.data.as_mut().fill(0);
        self.data.as_mut()[PAGE_TYPE_OFFSET] = page_type.as_u8();
        (&mut self.data.as_mut()[KEY_SIZE_OFFSET..KEY_SIZE_OFFSET + 2]).put_u16_le(key_size as u16);
        self.put_u32(SIZE_OFFSET, 0);
        self.put_u32(MAX_SIZE_OFFSET, max_size as u32);
        self.put_u32(PAGE_ID_OFFSET, page_id.as_u32());
        self.put_u32(PARENT_PAGE_OFFSET, parent_id.as_u32());
        self.put_u32(NEXT_PAGE_OFFSET, INVALID_PAGE_ID.as_u32());
    }

    pub fn set_size(&mut self, size: usize) {
        self.put_u32(SIZE_OFFSET, size as u32);
    }

    pub fn set_parent_page_id(&mut self, parent_id: PageId) {
        self.put_u32(PARENT_PAGE_OFFSET, parent_id.as_u32());
    }
}

/// Leaf node view: sorted (key, record id) pairs plus a link to the next leaf.
pub struct LeafNode<B> {
    page: BTreePage<B>,
}

impl<B> Deref for LeafNode<B> {
    type Target = BTreePage<B>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<B> DerefMut for LeafNode<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    pub fn new(data: B) -> Self {
        Self {
            page: BTreePage::new(data),
        }
    }

    fn slot_size(&self) -> usize {
        self.key_size() + RECORD_ID_SIZE
    }

    fn slot_offset(&self, index: usize) -> usize {
        BTREE_PAGE_HEADER_SIZE + index * self.slot_size()
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::new(self.page.get_u32(NEXT_PAGE_OFFSET))
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.slot_offset(index);
        &self.page.data.as_ref()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> RecordId {
        let offset = self.slot_offset(index) + self.key_size();
        let mut buf = &self.page.data.as_ref()[offset..offset + RECORD_ID_SIZE];
        let page_id = PageId::new(buf.get_u32_le());
        let slot_id = SlotId::new(buf.get_u16_le());
        RecordId::new(page_id, slot_id)
    }

    /// Index of the first key not less than `key` (`size()` if none).
    pub fn key_index(&self, key: &[u8], comparator: &dyn KeyComparator) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if comparator.compare(self.key_at(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn lookup(&self, key: &[u8], comparator: &dyn KeyComparator) -> Option<RecordId> {
        let index = self.key_index(key, comparator);
        (index < self.size() && comparator.compare(self.key_at(index), key) == Ordering::Equal)
            .then(|| self.value_at(index))
    }

    pub fn entries(&self) -> Vec<LeafEntry> {
        (0..self.size())
            .map(|i| (self.key_at(i).to_vec(), self.value_at(i)))
            .collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafNode<B> {
    pub fn init(&mut self, page_id: PageId, parent_id: PageId, key_size: usize, max_size: usize) {
        self.page
            .init_header(PageType::Leaf, page_id, parent_id, key_size, max_size);
    }

    pub fn set_next_page_id(&mut self, next_id: PageId) {
        self.page.put_u32(NEXT_PAGE_OFFSET, next_id.as_u32());
    }

    fn write_slot(&mut self, index: usize, key: &[u8], value: RecordId) {
        let key_size = self.key_size();
        let offset = self.slot_offset(index);
        let slot = &mut self.page.data.as_mut()[offset..offset + key_size + RECORD_ID_SIZE];
        slot[..key_size].copy_from_slice(key);
        let mut buf = &mut slot[key_size..];
        buf.put_u32_le(value.page_id.as_u32());
        buf.put_u16_le(value.slot_id.as_u16());
    }

    /// Inserts at `index`, shifting later entries right. The caller keeps
    /// keys sorted and the size within the page.
    pub fn insert_at(&mut self, index: usize, key: &[u8], value: RecordId) {
        let size = self.size();
        let start = self.slot_offset(index);
        let end = self.slot_offset(size);
        let width = self.slot_size();
        self.page.data.as_mut().copy_within(start..end, start + width);
        self.write_slot(index, key, value);
        self.set_size(size + 1);
    }

    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        let start = self.slot_offset(index);
        let end = self.slot_offset(size);
        let width = self.slot_size();
        self.page.data.as_mut().copy_within(start + width..end, start);
        self.set_size(size - 1);
    }

    /// Replaces the whole contents with `entries`.
    pub fn set_entries(&mut self, entries: &[LeafEntry]) {
        for (i, (key, value)) in entries.iter().enumerate() {
            self.write_slot(i, key, *value);
        }
        self.set_size(entries.len());
    }
}

/// Internal node view: `size()` children separated by `size() - 1` keys.
///
/// Child `i` holds keys in `[key_at(i), key_at(i + 1))`; `key_at(0)` is a
/// placeholder.
pub struct InternalNode<B> {
    page: BTreePage<B>,
}

impl<B> Deref for InternalNode<B> {
    type Target = BTreePage<B>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<B> DerefMut for InternalNode<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl<B: AsRef<[u8]>> InternalNode<B> {
    pub fn new(data: B) -> Self {
        Self {
            page: BTreePage::new(data),
        }
    }

    fn slot_size(&self) -> usize {
        self.key_size() + CHILD_POINTER_SIZE
    }

    fn slot_offset(&self, index: usize) -> usize {
        BTREE_PAGE_HEADER_SIZE + index * self.slot_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.slot_offset(index);
        &self.page.data.as_ref()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> PageId {
        let offset = self.slot_offset(index) + self.key_size();
        PageId::new((&self.page.data.as_ref()[offset..offset + 4]).get_u32_le())
    }

    /// Slot holding `child`, if any.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// Child whose key range contains `key`.
    pub fn lookup(&self, key: &[u8], comparator: &dyn KeyComparator) -> PageId {
        // Last slot in 1..size whose key is <= `key`, else slot 0
        let (mut lo, mut hi) = (1, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if comparator.compare(self.key_at(mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        self.value_at(lo - 1)
    }

    pub fn entries(&self) -> Vec<InternalEntry> {
        (0..self.size())
            .map(|i| (self.key_at(i).to_vec(), self.value_at(i)))
            .collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> InternalNode<B> {
    pub fn init(&mut self, page_id: PageId, parent_id: PageId, key_size: usize, max_size: usize) {
        self.page
            .init_header(PageType::Internal, page_id, parent_id, key_size, max_size);
    }

    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        let offset = self.slot_offset(index);
        let key_size = self.key_size();
        self.page.data.as_mut()[offset..offset + key_size].copy_from_slice(key);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        let offset = self.slot_offset(index) + self.key_size();
        (&mut self.page.data.as_mut()[offset..offset + 4]).put_u32_le(child.as_u32());
    }

    fn write_slot(&mut self, index: usize, key: &[u8], child: PageId) {
        if index == 0 {
            let offset = self.slot_offset(0);
            let key_size = self.key_size();
            self.page.data.as_mut()[offset..offset + key_size].fill(0);
        } else {
            self.set_key_at(index, key);
        }
        self.set_value_at(index, child);
    }

    /// Turns an empty node into a root with exactly two children.
    pub fn populate_new_root(&mut self, left: PageId, key: &[u8], right: PageId) {
        self.write_slot(0, &[], left);
        self.write_slot(1, key, right);
        self.set_size(2);
    }

    /// Inserts `(key, child)` at `index >= 1`, shifting later slots right.
    pub fn insert_at(&mut self, index: usize, key: &[u8], child: PageId) {
        let size = self.size();
        let start = self.slot_offset(index);
        let end = self.slot_offset(size);
        let width = self.slot_size();
        self.page.data.as_mut().copy_within(start..end, start + width);
        self.write_slot(index, key, child);
        self.set_size(size + 1);
    }

    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        let start = self.slot_offset(index);
        let end = self.slot_offset(size);
        let width = self.slot_size();
        self.page.data.as_mut().copy_within(start + width..end, start);
        self.set_size(size - 1);
        if index == 0 && size > 1 {
            let offset = self.slot_offset(0);
            let key_size = self.key_size();
            self.page.data.as_mut()[offset..offset + key_size].fill(0);
        }
    }

    /// Replaces the whole contents with `entries`; the first key is dropped.
    pub fn set_entries(&mut self, entries: &[InternalEntry]) {
        for (i, (key, child)) in entries.iter().enumerate() {
            self.write_slot(i, key, *child);
        }
        self.set_size(entries.len());
    }
}
