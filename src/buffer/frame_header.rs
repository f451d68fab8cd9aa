use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Page bytes of one frame, behind the frame's page latch
pub type FrameData = Box<[u8; PAGE_SIZE]>;

/// FrameHeader is one slot of the buffer pool.
///
/// The resident page id, pin count and dirty flag are only changed while the
/// pool latch is held. The page bytes have their own reader/writer latch,
/// which page guards take after pinning and release before unpinning, so a
/// frame with pin count 0 never has a latch holder.
pub struct FrameHeader {
    frame_id: FrameId,
    /// Raw id of the resident page (`INVALID_PAGE_ID` when empty)
    page_id: AtomicU32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    /// Page latch over the page contents
    data: RwLock<FrameData>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID.as_u32()),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    /// Returns None if the pin count was already 0.
    pub fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Takes the page latch in shared mode.
    pub fn read_data(&self) -> RwLockReadGuard<'_, FrameData> {
        self.data.read()
    }

    /// Takes the page latch in exclusive mode.
    pub fn write_data(&self) -> RwLockWriteGuard<'_, FrameData> {
        self.data.write()
    }

    /// Empties the frame so it can go back on the free list.
    pub fn reset(&self) {
        self.set_page_id(INVALID_PAGE_ID);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}
