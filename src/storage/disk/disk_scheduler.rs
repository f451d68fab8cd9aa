use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error};

use crate::common::{CinderError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// Capacity of the request queue between callers and the worker thread
const REQUEST_QUEUE_CAPACITY: usize = 128;

/// A disk I/O request. Buffers are owned by the request, so the worker never
/// touches caller memory; results come back on the request's reply channel.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        reply: Sender<Result<BytesMut>>,
    },
    Write {
        page_id: PageId,
        data: Bytes,
        reply: Sender<Result<()>>,
    },
}

impl DiskRequest {
    pub fn page_id(&self) -> PageId {
        match self {
            DiskRequest::Read { page_id, .. } | DiskRequest::Write { page_id, .. } => *page_id,
        }
    }
}

/// DiskScheduler manages a background worker thread that processes disk I/O requests.
/// Requests are served in submission order.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    /// Taken on drop so the worker sees a closed queue and exits
    request_sender: Option<Sender<DiskRequest>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler with the given DiskManager.
    /// Spawns a background worker thread to process requests.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(REQUEST_QUEUE_CAPACITY);

        let dm_clone = Arc::clone(&disk_manager);
        let worker_handle = thread::Builder::new()
            .name("cinder-disk-io".to_string())
            .spawn(move || Self::run_worker(dm_clone, receiver))
            .ok();
        if worker_handle.is_none() {
            error!("Failed to spawn disk I/O worker thread");
        }

        Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle,
        }
    }

    /// Queues a request for the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        let sender = self
            .request_sender
            .as_ref()
            .ok_or_else(|| CinderError::DiskScheduler("scheduler is shut down".to_string()))?;
        sender
            .send(request)
            .map_err(|e| CinderError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    /// Queues a page read. The returned receiver yields the page contents.
    pub fn schedule_read(&self, page_id: PageId) -> Result<Receiver<Result<BytesMut>>> {
        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Read { page_id, reply: tx })?;
        Ok(rx)
    }

    /// Queues a page write. The returned receiver signals completion.
    pub fn schedule_write(&self, page_id: PageId, data: Bytes) -> Result<Receiver<Result<()>>> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            reply: tx,
        })?;
        Ok(rx)
    }

    /// Reads a page through the worker and copies it into `data`.
    pub fn read_page_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        let page = Self::wait(self.schedule_read(page_id)?)?;
        data.copy_from_slice(&page);
        Ok(())
    }

    /// Writes a copy of `data` through the worker and waits for it to land.
    pub fn write_page_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        Self::wait(self.schedule_write(page_id, Bytes::copy_from_slice(data))?)
    }

    fn wait<T>(rx: Receiver<Result<T>>) -> Result<T> {
        rx.recv().map_err(|e| {
            CinderError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?
    }

    /// Serves requests until every sender is gone.
    fn run_worker(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        for request in receiver.iter() {
            Self::process_request(&disk_manager, request);
        }
        debug!("Disk I/O worker exiting");
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, reply } => {
                let mut buf = BytesMut::zeroed(PAGE_SIZE);
                let result = disk_manager.read_page(page_id, &mut buf).map(|_| buf);
                let _ = reply.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                reply,
            } => {
                let _ = reply.send(disk_manager.write_page(page_id, &data));
            }
        }
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain what is left and exit
        drop(self.request_sender.take());

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
