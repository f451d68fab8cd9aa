//! Cinder - the storage core of a disk-oriented database in Rust
//!
//! Pages live in a single database file and are cached in a fixed set of
//! in-memory frames. On top of that cache sits a concurrent B+Tree index.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): Page I/O and on-disk formats
//!   - `DiskManager`: Reads and writes fixed-size pages of the database file
//!   - `DiskScheduler`: Background worker serving queued page I/O requests
//!   - `HeaderPage`: Page 0, mapping index names to their root pages
//!
//! - **Containers** (`container`):
//!   - `ExtendibleHashTable`: Thread-safe hash table used as the page table
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Fetches pages from disk and caches them in frames
//!   - `LruKReplacer`: LRU-K victim selection
//!   - `FrameHeader`: Per-frame metadata and data storage
//!   - `BasicPageGuard`/`ReadPageGuard`/`WritePageGuard`: Scope-bound pins and latches
//!
//! - **Index** (`index`): B+Tree with latch crabbing, iterators and range scans
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cinder::buffer::BufferPoolManager;
//! use cinder::common::{BTreeConfig, PageId, RecordId, SlotId};
//! use cinder::index::{BPlusTree, IntegerComparator};
//! use cinder::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new(
//!     "accounts",
//!     Arc::clone(&bpm),
//!     Arc::new(IntegerComparator),
//!     BTreeConfig::new(4, 32, 32),
//! )
//! .unwrap();
//!
//! let rid = RecordId::new(PageId::new(7), SlotId::new(3));
//! tree.insert(&42u32.to_le_bytes(), rid).unwrap();
//! assert_eq!(tree.get_value(&42u32.to_le_bytes()).unwrap(), vec![rid]);
//!
//! bpm.flush_all_pages().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{CinderError, PageId, RecordId, Result, SlotId};
