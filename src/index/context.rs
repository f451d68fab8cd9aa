use std::collections::VecDeque;

use parking_lot::RwLockWriteGuard;

use crate::buffer::WritePageGuard;
use crate::common::PageId;

/// Latches a writer still holds on its way down the tree.
///
/// `write_set` is the latched path from the topmost retained node down to
/// the parent of the node being worked on, so its back is always the next
/// ancestor to modify.
pub(crate) struct Context<'a> {
    /// Whole-tree latch over the root page id, dropped once a safe node is reached
    pub root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    pub write_set: VecDeque<WritePageGuard<'a>>,
}

impl<'a> Context<'a> {
    pub fn new(root_guard: RwLockWriteGuard<'a, PageId>) -> Self {
        Self {
            root_guard: Some(root_guard),
            write_set: VecDeque::new(),
        }
    }

    /// Releases the tree latch and every page latch held so far. Called when
    /// the node about to be pushed cannot propagate a change upwards.
    pub fn release_ancestors(&mut self) {
        self.root_guard = None;
        self.write_set.clear();
    }

    pub fn holds_root_latch(&self) -> bool {
        self.root_guard.is_some()
    }
}
