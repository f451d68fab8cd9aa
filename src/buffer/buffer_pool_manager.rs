use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::common::{
    CinderError, FrameId, PageId, Result, DEFAULT_PAGE_TABLE_BUCKET_SIZE, HEADER_PAGE_ID,
    PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{BasicPageGuard, FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// State guarded by the pool latch
struct PoolState {
    /// Frames holding no page
    free_list: VecDeque<FrameId>,
}

/// BufferPoolManager is responsible for fetching database pages from disk
/// and storing them in memory. It manages a fixed number of frames and uses
/// the LRU-K replacement policy to decide which pages to evict.
///
/// Every public operation runs under one pool-wide latch. Page contents are
/// protected separately by each frame's page latch, which callers take
/// through the guards returned here.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FrameHeader>,
    latch: Mutex<PoolState>,
    /// Resident page -> frame holding it
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value for LRU-K,
    /// and disk manager.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let frames = (0..pool_size)
            .map(|i| FrameHeader::new(FrameId::new(i as u32)))
            .collect();
        let free_list = (0..pool_size).map(|i| FrameId::new(i as u32)).collect();

        Self {
            pool_size,
            frames,
            latch: Mutex::new(PoolState { free_list }),
            page_table: ExtendibleHashTable::new(DEFAULT_PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(k, pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    pub(crate) fn frame(&self, frame_id: FrameId) -> &FrameHeader {
        &self.frames[frame_id.as_usize()]
    }

    /// Allocates a fresh zeroed page and returns it pinned.
    ///
    /// Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<BasicPageGuard<'_>> {
        let mut state = self.latch.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = match self.disk_manager().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let frame = self.frame(frame_id);
        frame.reset();
        frame.set_page_id(page_id);
        self.pin_frame(frame_id)?;
        self.page_table.insert(page_id, frame_id);

        trace!("New {} in {}", page_id, frame_id);
        Ok(BasicPageGuard::new(self, page_id, frame_id))
    }

    /// Pins a page, reading it from disk if it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<BasicPageGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        Ok(BasicPageGuard::new(self, page_id, frame_id))
    }

    /// Pins a page and takes its latch in shared mode.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        Ok(self.fetch_page(page_id)?.upgrade_read())
    }

    /// Pins a page and takes its latch in exclusive mode.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        Ok(self.fetch_page(page_id)?.upgrade_write())
    }

    /// Drops one pin on a resident page, ORing `is_dirty` into its dirty flag.
    /// The frame becomes evictable when its pin count reaches zero.
    ///
    /// Returns false if the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _state = self.latch.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };

        let frame = self.frame(frame_id);
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == Some(0) {
            if let Err(e) = self.replacer.set_evictable(frame_id, true) {
                warn!("Could not mark {} evictable: {}", frame_id, e);
            }
        }
        true
    }

    /// Writes a resident page to disk regardless of its dirty flag and clears
    /// the flag. Returns false if the page is not resident, which includes
    /// the invalid page id.
    ///
    /// The page is pinned for the duration of the write, so it cannot be
    /// evicted underneath the flush, and its bytes are read under the shared
    /// page latch.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Ok(false);
        }

        let frame_id = {
            let _state = self.latch.lock();
            let Some(frame_id) = self.page_table.find(&page_id) else {
                return Ok(false);
            };
            self.frame(frame_id).pin();
            self.replacer.set_evictable(frame_id, false)?;
            frame_id
        };
        let guard = BasicPageGuard::new(self, page_id, frame_id);

        let frame = self.frame(frame_id);
        {
            let data = frame.read_data();
            self.disk_scheduler.write_page_sync(page_id, &data[..])?;
            frame.set_dirty(false);
        }
        drop(guard);

        trace!("Flushed {}", page_id);
        Ok(true)
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        for page_id in self.page_table.keys() {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Removes a page from the pool and releases it on disk.
    ///
    /// Returns false while the page is pinned. Deleting a page that is not
    /// resident only releases it on disk. The header page and the invalid id
    /// are refused with `InvalidPageId`.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == HEADER_PAGE_ID || !page_id.is_valid() {
            return Err(CinderError::InvalidPageId(page_id));
        }
        let mut state = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = self.frame(frame_id);
            if frame.pin_count() > 0 {
                return Ok(false);
            }

            self.replacer.set_evictable(frame_id, false)?;
            self.replacer.remove(frame_id)?;
            self.page_table.remove(&page_id);
            frame.reset();
            state.free_list.push_back(frame_id);
            trace!("Deleted {} from {}", page_id, frame_id);
        }

        self.disk_manager().deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns the pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _state = self.latch.lock();
        self.page_table
            .find(&page_id)
            .map(|frame_id| self.frame(frame_id).pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of frames holding no page.
    pub fn free_frame_count(&self) -> usize {
        self.latch.lock().free_list.len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Records an access and keeps the frame out of the eviction candidates.
    fn pin_frame(&self, frame_id: FrameId) -> Result<()> {
        self.frame(frame_id).pin();
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)
    }

    /// Finds or loads a page and pins its frame.
    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        if !page_id.is_valid() {
            return Err(CinderError::InvalidPageId(page_id));
        }
        if page_id.as_u32() >= self.disk_manager().num_pages() {
            return Err(CinderError::PageNotFound(page_id));
        }

        let mut state = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            self.pin_frame(frame_id)?;
            trace!("Hit {} in {}", page_id, frame_id);
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = self.frame(frame_id);
        {
            let mut data = frame.write_data();
            if let Err(e) = self.disk_scheduler.read_page_sync(page_id, &mut data[..]) {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        }

        frame.set_page_id(page_id);
        frame.set_dirty(false);
        self.pin_frame(frame_id)?;
        self.page_table.insert(page_id, frame_id);

        trace!("Loaded {} into {}", page_id, frame_id);
        Ok(frame_id)
    }

    /// Takes a frame from the free list, or evicts one.
    ///
    /// A dirty victim is written back before its page table entry is dropped.
    /// The returned frame is empty and unpinned.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(CinderError::BufferPoolFull)?;
        let frame = self.frame(frame_id);
        let victim = frame.page_id();

        if frame.is_dirty() {
            let written = {
                let data = frame.read_data();
                self.disk_scheduler.write_page_sync(victim, &data[..])
            };
            if let Err(e) = written {
                // Put the victim back so the page stays cached and evictable
                self.replacer.record_access(frame_id)?;
                self.replacer.set_evictable(frame_id, true)?;
                return Err(e);
            }
        }

        self.page_table.remove(&victim);
        frame.reset();

        debug!("Evicted {} from {}", victim, frame_id);
        Ok(frame_id)
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all_pages() {
            warn!("Failed to flush buffer pool on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, 2, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_buffer_pool_manager_new() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_buffer_pool_manager_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        // Page 0 belongs to the header
        assert_eq!(page_id, PageId::new(1));
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_buffer_pool_manager_unpin_rules() {
        let (bpm, _temp) = create_bpm(4);

        let page_id = bpm.new_page().unwrap().page_id();
        assert!(!bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(PageId::new(99), false));
    }

    #[test]
    fn test_buffer_pool_manager_fetch_invalid() {
        let (bpm, _temp) = create_bpm(4);
        assert!(matches!(
            bpm.fetch_page(crate::common::INVALID_PAGE_ID),
            Err(CinderError::InvalidPageId(_))
        ));
        assert!(matches!(
            bpm.fetch_page(PageId::new(42)),
            Err(CinderError::PageNotFound(_))
        ));
    }

    #[test]
    fn test_buffer_pool_manager_flush_clears_dirty() {
        let (bpm, temp) = create_bpm(10);

        let page_id = {
            let mut guard = bpm.new_page().unwrap().upgrade_write();
            guard.data_mut()[0] = 42;
            guard.page_id()
        };
        assert!(bpm.frame(bpm.page_table.find(&page_id).unwrap()).is_dirty());

        assert!(bpm.flush_page(page_id).unwrap());
        assert!(!bpm.frame(bpm.page_table.find(&page_id).unwrap()).is_dirty());
        assert!(!bpm.flush_page(PageId::new(77)).unwrap());

        let dm = DiskManager::new(temp.path()).unwrap();
        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert_eq!(data[0], 42);
    }

    #[test]
    fn test_buffer_pool_manager_eviction_writes_back() {
        let (bpm, _temp) = create_bpm(2);

        let first = {
            let mut guard = bpm.new_page().unwrap().upgrade_write();
            guard.data_mut()[0] = 11;
            guard.page_id()
        };
        let _second = bpm.new_page().unwrap();

        let writes_before = bpm.disk_manager().num_writes();
        let third = bpm.new_page().unwrap();
        assert!(bpm.disk_manager().num_writes() > writes_before);
        assert_eq!(bpm.get_pin_count(first), None);
        drop(third);

        let guard = bpm.fetch_page_read(first).unwrap();
        assert_eq!(guard.data()[0], 11);
    }

    #[test]
    fn test_buffer_pool_manager_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        assert!(!bpm.delete_page(page_id).unwrap());

        drop(guard);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        // Not resident any more: still reported as deleted
        assert!(bpm.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_buffer_pool_manager_delete_refuses_header_page() {
        let (bpm, _temp) = create_bpm(4);
        drop(bpm.fetch_page(HEADER_PAGE_ID).unwrap());

        assert!(matches!(
            bpm.delete_page(HEADER_PAGE_ID),
            Err(CinderError::InvalidPageId(_))
        ));
        assert!(matches!(
            bpm.delete_page(crate::common::INVALID_PAGE_ID),
            Err(CinderError::InvalidPageId(_))
        ));
        assert_eq!(bpm.get_pin_count(HEADER_PAGE_ID), Some(0));
    }

    #[test]
    fn test_buffer_pool_manager_buffer_pool_full() {
        let (bpm, _temp) = create_bpm(2);

        let _guard1 = bpm.new_page().unwrap();
        let _guard2 = bpm.new_page().unwrap();

        assert!(matches!(bpm.new_page(), Err(CinderError::BufferPoolFull)));
    }
}
