//! Scope-bound page handles.
//!
//! Every guard owns exactly one pin on its page and gives it back through
//! [`BufferPoolManager::unpin_page`] when dropped:
//! - [`BasicPageGuard`] - pin only, no latch
//! - [`ReadPageGuard`] - pin plus the page latch in shared mode
//! - [`WritePageGuard`] - pin plus the page latch in exclusive mode
//!
//! Latched guards release the latch before the pin.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId};

use super::{BufferPoolManager, FrameData};

/// One pin on a page, returned to the pool on drop.
struct PinnedPage<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    frame_id: FrameId,
    is_dirty: bool,
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// Guard holding a pin without a latch. Upgrade it to read or write the page.
pub struct BasicPageGuard<'a> {
    pin: PinnedPage<'a>,
}

impl<'a> BasicPageGuard<'a> {
    /// Wraps a pin the caller already took on `frame_id`.
    pub(crate) fn new(bpm: &'a BufferPoolManager, page_id: PageId, frame_id: FrameId) -> Self {
        Self {
            pin: PinnedPage {
                bpm,
                page_id,
                frame_id,
                is_dirty: false,
            },
        }
    }

    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.pin.frame_id
    }

    /// Takes the page latch in shared mode, keeping the pin.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        let bpm = self.pin.bpm;
        let latch = bpm.frame(self.pin.frame_id).read_data();
        ReadPageGuard {
            latch,
            pin: self.pin,
        }
    }

    /// Takes the page latch in exclusive mode, keeping the pin.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        let bpm = self.pin.bpm;
        let latch = bpm.frame(self.pin.frame_id).write_data();
        WritePageGuard {
            latch,
            pin: self.pin,
        }
    }
}

/// Guard for read-only access to a page.
pub struct ReadPageGuard<'a> {
    // Declared before `pin` so the latch is released first
    latch: RwLockReadGuard<'a, FrameData>,
    pin: PinnedPage<'a>,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Drops this guard, releasing the page.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

/// Guard for exclusive access to a page.
/// The page is reported dirty on release once it has been mutably borrowed.
pub struct WritePageGuard<'a> {
    // Declared before `pin` so the latch is released first
    latch: RwLockWriteGuard<'a, FrameData>,
    pin: PinnedPage<'a>,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.pin.is_dirty = true;
        &mut self.latch[..]
    }

    pub fn is_dirty(&self) -> bool {
        self.pin.is_dirty
    }

    /// Drops this guard, releasing the page.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}
