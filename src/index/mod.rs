pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
mod context;
pub mod key_comparator;

pub use btree_index::BPlusTree;
pub use btree_iterator::BTreeIterator;
pub use btree_page::{BTreePage, InternalNode, LeafNode, PageType};
pub use key_comparator::{BytewiseComparator, I64Comparator, IntegerComparator, KeyComparator};
