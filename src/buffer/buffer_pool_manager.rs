use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::{FrameId, PageId, Result, TaprootError, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruReplacer, ReadPageGuard, WritePageGuard};

/// Bookkeeping guarded by the pool's single mutex. Invariant: the free
/// list and the page table partition the frame array between them.
struct PoolInner {
    /// Maps resident page IDs to the frames holding them
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page
    free_list: VecDeque<FrameId>,
}

/// State shared with page guards, which outlive the borrow of the
/// manager that created them.
struct PoolState {
    frames: Vec<Arc<FrameHeader>>,
    inner: Mutex<PoolInner>,
    replacer: LruReplacer,
}

impl PoolState {
    /// Drops one handle on a page: OR-combines the dirty flag (dirtiness
    /// is sticky until a flush clears it) and, when the pin count
    /// reaches zero, makes the frame evictable.
    fn release_page(&self, page_id: PageId, is_dirty: bool) {
        let inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            if is_dirty {
                frame.set_dirty(true);
            }
            if let Some(0) = frame.unpin() {
                self.replacer.unpin(frame_id);
            }
        }
    }
}

/// BufferPoolManager caches disk pages in a fixed array of frames.
/// Pages are pinned through RAII guards and evicted under an LRU policy
/// once no handle remains. A single mutex serializes all bookkeeping.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<PoolState>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with `pool_size` frames backed by
    /// the given disk manager. Initially every frame is on the free list.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(PoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a fresh page on disk and installs it in a frame. The
    /// frame starts out evictable; callers pin it by taking a guard.
    /// Fails with `PoolExhausted` when every frame is pinned.
    pub fn new_page(&self) -> Result<PageId> {
        let mut inner = self.state.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        inner.page_table.insert(page_id, frame_id);
        self.state.replacer.unpin(frame_id);

        debug!(
            page_id = page_id.as_u32(),
            frame_id = frame_id.as_u32(),
            "created page"
        );
        Ok(page_id)
    }

    /// Pins a page for shared access, reading it from disk if it is not
    /// resident. The returned guard holds the page latch in read mode.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(TaprootError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_frame(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        // Safety: the Arc passed in keeps the frame alive for the
        // guard's lifetime.
        let guard = unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, dirty| state.release_page(pid, dirty)),
            )
        };
        Ok(guard)
    }

    /// Pins a page for exclusive access. The returned guard holds the
    /// page latch in write mode.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(TaprootError::InvalidPageId(page_id));
        }

        let frame_id = self.fetch_frame(page_id)?;
        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        let state = Arc::clone(&self.state);

        // Safety: as above.
        let guard = unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, dirty| state.release_page(pid, dirty)),
            )
        };
        Ok(guard)
    }

    /// Writes a page to disk if it is resident and clears its dirty
    /// flag. Pin state is unchanged. Returns false if the page is not in
    /// the pool.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(TaprootError::InvalidPageId(page_id));
        }

        // Pin the frame so it cannot be evicted, then drop the pool lock
        // before waiting on the page latch: a latch holder may itself be
        // blocked on the pool lock.
        let frame = {
            let inner = self.state.inner.lock();
            match inner.page_table.get(&page_id) {
                Some(&frame_id) => {
                    let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
                    frame.pin();
                    self.state.replacer.pin(frame_id);
                    frame
                }
                None => return Ok(false),
            }
        };

        let mut data = [0u8; PAGE_SIZE];
        frame.set_dirty(false);
        frame.copy_to(&mut data);
        let write_result = self.disk_scheduler.schedule_write_sync(page_id, &data);

        self.state.release_page(page_id, false);
        write_result?;

        trace!(page_id = page_id.as_u32(), "flushed page");
        Ok(true)
    }

    /// Flushes every dirty page in the pool to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let resident: Vec<PageId> = {
            let inner = self.state.inner.lock();
            inner.page_table.keys().copied().collect()
        };

        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Removes a page from the pool and deallocates it on disk. Returns
    /// `Ok(true)` if the page was removed or was not resident to begin
    /// with; fails if the page is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.state.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            // Not resident: deleting is idempotent.
            return Ok(true);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Err(TaprootError::PagePinned(page_id));
        }

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        }

        inner.page_table.remove(&page_id);
        self.state.replacer.pin(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);

        self.disk_scheduler.disk_manager().deallocate_page(page_id);

        debug!(page_id = page_id.as_u32(), "deleted page");
        Ok(true)
    }

    /// Returns the pin count for a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    /// Brings a page into a frame and pins it, reading from disk on a
    /// miss. The pool lock is held for the whole operation.
    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        let mut inner = self.state.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.pin(frame_id);
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame(&mut inner)?;

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut data) {
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        let frame = &self.state.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        inner.page_table.insert(page_id, frame_id);
        self.state.replacer.pin(frame_id);

        Ok(frame_id)
    }

    /// Secures an empty frame: pops the free list, or evicts the LRU
    /// victim (writing it back first if dirty). The caller must hold the
    /// pool lock. A victim's pin count is zero, so its latch is free and
    /// copying its bytes cannot block.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .state
            .replacer
            .victim()
            .ok_or(TaprootError::PoolExhausted)?;

        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(old_page_id, &data)?;
            trace!(
                page_id = old_page_id.as_u32(),
                frame_id = frame_id.as_u32(),
                "wrote back evicted page"
            );
        }

        inner.page_table.remove(&old_page_id);
        frame.reset();

        debug!(
            page_id = old_page_id.as_u32(),
            frame_id = frame_id.as_u32(),
            "evicted page"
        );
        Ok(frame_id)
    }
}
