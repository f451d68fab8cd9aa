use super::error::{CinderError, Result};
use super::types::{FrameId, PageId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Page reserved for the (index name, root page) records
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 10;

/// Entries per bucket in the buffer pool's page table
pub const DEFAULT_PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// Default width in bytes of a B+Tree key
pub const DEFAULT_KEY_SIZE: usize = 8;

/// Bytes reserved at the start of every B+Tree page for its header
pub const BTREE_PAGE_HEADER_SIZE: usize = 24;

/// Serialized size of a `RecordId` (page id + slot id)
pub const RECORD_ID_SIZE: usize = 6;

/// Serialized size of a child pointer in an internal node
pub const CHILD_POINTER_SIZE: usize = 4;

/// Node sizing for a B+Tree index.
///
/// `leaf_max_size` counts (key, record) pairs, `internal_max_size` counts
/// children. Every non-root node keeps at least half of its maximum, rounded up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeConfig {
    pub key_size: usize,
    pub leaf_max_size: usize,
    pub internal_max_size: usize,
}

impl BTreeConfig {
    pub fn new(key_size: usize, leaf_max_size: usize, internal_max_size: usize) -> Self {
        Self {
            key_size,
            leaf_max_size,
            internal_max_size,
        }
    }

    /// Largest leaf fanout that fits a page for the given key width.
    pub fn max_leaf_capacity(key_size: usize) -> usize {
        (PAGE_SIZE - BTREE_PAGE_HEADER_SIZE) / (key_size + RECORD_ID_SIZE)
    }

    /// Largest internal fanout that fits a page for the given key width.
    pub fn max_internal_capacity(key_size: usize) -> usize {
        (PAGE_SIZE - BTREE_PAGE_HEADER_SIZE) / (key_size + CHILD_POINTER_SIZE)
    }

    pub fn leaf_min_size(&self) -> usize {
        self.leaf_max_size.div_ceil(2)
    }

    pub fn internal_min_size(&self) -> usize {
        self.internal_max_size.div_ceil(2)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_size == 0 || self.key_size > u16::MAX as usize {
            return Err(CinderError::InvalidConfig(format!(
                "key size {} out of range",
                self.key_size
            )));
        }
        if self.leaf_max_size < 2 {
            return Err(CinderError::InvalidConfig(format!(
                "leaf max size {} must be at least 2",
                self.leaf_max_size
            )));
        }
        if self.internal_max_size < 3 {
            return Err(CinderError::InvalidConfig(format!(
                "internal max size {} must be at least 3",
                self.internal_max_size
            )));
        }
        if self.leaf_max_size > Self::max_leaf_capacity(self.key_size) {
            return Err(CinderError::InvalidConfig(format!(
                "leaf max size {} does not fit a page with {}-byte keys",
                self.leaf_max_size, self.key_size
            )));
        }
        if self.internal_max_size > Self::max_internal_capacity(self.key_size) {
            return Err(CinderError::InvalidConfig(format!(
                "internal max size {} does not fit a page with {}-byte keys",
                self.internal_max_size, self.key_size
            )));
        }
        Ok(())
    }
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            key_size: DEFAULT_KEY_SIZE,
            leaf_max_size: Self::max_leaf_capacity(DEFAULT_KEY_SIZE),
            internal_max_size: Self::max_internal_capacity(DEFAULT_KEY_SIZE),
        }
    }
}
