use std::collections::LinkedList;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{
    FrameId, PageId, QuarryError, Result, BUCKET_SIZE, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::hash::ExtendibleHashTable;
use crate::storage::disk::DiskManager;
use crate::wal::LogManager;

use super::{Frame, LruReplacer, ReadPageGuard, WritePageGuard};

/// Internal state shared with the guard release callbacks
struct PoolState {
    /// The buffer pool frames
    frames: Vec<Arc<Frame>>,
    /// Page table: maps page IDs to frame IDs
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Frames that have never been used or were freed by delete_page
    free_list: Mutex<LinkedList<FrameId>>,
    /// LRU replacer choosing victims among unpinned frames
    replacer: LruReplacer<FrameId>,
    /// Manager mutex serialising fetch/new/flush/delete metadata updates
    latch: Mutex<()>,
}

/// BufferPoolManager owns a fixed array of frames and moves database pages
/// between them and disk. Callers access pages through RAII guards that
/// hold the pin and the page latch; dropping a guard unpins the page and,
/// at pin count zero, hands the frame back to the replacer.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
    disk_manager: Arc<DiskManager>,
    /// Present when write-ahead logging is wired in; eviction of a dirty
    /// page then waits for the log to cover the page's LSN.
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_log_manager(pool_size, disk_manager, None)
    }

    pub fn with_log_manager(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = LinkedList::new();

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            page_table: ExtendibleHashTable::new(BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            replacer: LruReplacer::new(),
            latch: Mutex::new(()),
        });

        Self {
            pool_size,
            state,
            disk_manager,
            log_manager,
        }
    }

    /// Allocates a fresh zeroed page and returns it pinned for writing.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let frame = {
            let _guard = self.state.latch.lock();

            let frame_id = self.acquire_frame()?;
            let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

            let page_id = self.disk_manager.allocate_page();
            frame.reset();
            frame.set_page_id(page_id);
            frame.pin();

            self.state.page_table.insert(page_id, frame_id);
            frame
        };

        let page_id = frame.page_id();
        Ok(unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) })
    }

    /// Fetches a page for shared access, reading it from disk if absent.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_frame(page_id)?;
        Ok(unsafe { ReadPageGuard::new(page_id, frame, self.release_callback()) })
    }

    /// Fetches a page for exclusive access, reading it from disk if absent.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_frame(page_id)?;
        Ok(unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) })
    }

    /// Installs a zeroed frame for a page id without reading the disk.
    /// Recovery uses this for pages named in the log that never made it to
    /// the data file; everything else should go through the fetch methods.
    pub fn install_zeroed_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = {
            let _guard = self.state.latch.lock();

            if let Some(frame_id) = self.state.page_table.find(&page_id) {
                let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
                frame.pin();
                self.state.replacer.erase(frame_id);
                frame
            } else {
                let frame_id = self.acquire_frame()?;
                let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
                frame.reset();
                frame.set_page_id(page_id);
                frame.pin();
                self.state.page_table.insert(page_id, frame_id);
                frame
            }
        };

        Ok(unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) })
    }

    /// Writes a page's current contents to disk. Returns false if the page
    /// is not cached.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(QuarryError::InvalidPageId(page_id));
        }

        let _guard = self.state.latch.lock();

        if let Some(frame_id) = self.state.page_table.find(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            self.write_back(frame, page_id)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Flushes every dirty frame; used at engine shutdown.
    pub fn flush_all_dirty_pages(&self) -> Result<()> {
        let _guard = self.state.latch.lock();

        for frame in &self.state.frames {
            let page_id = frame.page_id();
            if page_id != INVALID_PAGE_ID && frame.is_dirty() {
                self.write_back(frame, page_id)?;
            }
        }
        Ok(())
    }

    /// Drops an unpinned page from the pool, returning its frame to the
    /// free list. Returns false if the page is not cached.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let _guard = self.state.latch.lock();

        if let Some(frame_id) = self.state.page_table.find(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];

            if frame.pin_count() > 0 {
                return Err(QuarryError::PageStillPinned(page_id));
            }

            self.state.page_table.remove(&page_id);
            self.state.replacer.erase(frame_id);
            frame.reset();
            self.state.free_list.lock().push_back(frame_id);
            self.disk_manager.deallocate_page(page_id);

            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.free_list.lock().len()
    }

    pub fn replacer_size(&self) -> usize {
        self.state.replacer.size()
    }

    pub fn page_table_len(&self) -> usize {
        self.state.page_table.size()
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let _guard = self.state.latch.lock();
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Builds the closure a guard runs on drop: mark dirty, unpin, and at
    /// pin count zero hand the frame to the replacer.
    fn release_callback(&self) -> Box<dyn FnOnce(PageId, bool) + Send + Sync> {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            let _guard = state.latch.lock();
            if let Some(frame_id) = state.page_table.find(&page_id) {
                let frame = &state.frames[frame_id.as_usize()];
                if is_dirty {
                    frame.set_dirty(true);
                }
                if let Some(0) = frame.unpin() {
                    state.replacer.insert(frame_id);
                }
            }
        })
    }

    /// Pins the page's frame, loading the page from disk if necessary.
    fn fetch_frame(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if page_id == INVALID_PAGE_ID {
            return Err(QuarryError::InvalidPageId(page_id));
        }

        let _guard = self.state.latch.lock();

        if let Some(frame_id) = self.state.page_table.find(&page_id) {
            let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
            frame.pin();
            self.state.replacer.erase(frame_id);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame()?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_manager.read_page(page_id, &mut data) {
            // Hand the frame back rather than leaking it
            self.state.free_list.lock().push_back(frame_id);
            return Err(e);
        }

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        self.state.page_table.insert(page_id, frame_id);

        Ok(frame)
    }

    /// Gets a frame for a new resident page, either from the free list or
    /// by evicting the replacer's victim. Caller holds the manager latch.
    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.state.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .state
            .replacer
            .victim()
            .ok_or(QuarryError::BufferPoolFull)?;

        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            debug!(page = %old_page_id, "evicting dirty page");
            self.write_back(frame, old_page_id)?;
        }

        self.state.page_table.remove(&old_page_id);
        frame.reset();

        Ok(frame_id)
    }

    /// Writes a frame's page to disk, honouring the WAL rule: the log must
    /// cover the page's LSN before the page bytes may reach the file.
    fn write_back(&self, frame: &Frame, page_id: PageId) -> Result<()> {
        if let Some(log_manager) = &self.log_manager {
            let lsn = frame.lsn();
            if log_manager.is_enabled() && lsn != INVALID_LSN && lsn > log_manager.persistent_lsn()
            {
                log_manager.flush_until(lsn);
            }
        }

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_manager.write_page(page_id, &data)?;
        frame.set_dirty(false);
        Ok(())
    }
}
