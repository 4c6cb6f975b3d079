use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::FrameHeader;

/// Callback invoked when a guard releases its page: (page_id, is_dirty).
type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// RAII guard for shared access to a pinned page. Holds the page latch
/// in read mode; unpins the page when dropped.
pub struct ReadPageGuard {
    page_id: PageId,
    /// Keeps the frame alive for the lifetime of the latch guard
    _frame: Arc<FrameHeader>,
    data_guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    release: Option<ReleaseCallback>,
}

impl ReadPageGuard {
    /// # Safety
    /// The latch guard is transmuted to the 'static lifetime; the caller
    /// must pass the owning frame so the Arc keeps it alive at least as
    /// long as this guard.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.read();
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            page_id,
            _frame: frame,
            data_guard: Some(data_guard),
            release: Some(release),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().expect("latch held")[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the latch before unpinning so the pool never sees a
        // latched frame with pin count zero.
        self.data_guard.take();
        if let Some(release) = self.release.take() {
            release(self.page_id, false);
        }
    }
}

/// RAII guard for exclusive access to a pinned page. Holds the page
/// latch in write mode; reports dirtiness and unpins when dropped.
pub struct WritePageGuard {
    page_id: PageId,
    _frame: Arc<FrameHeader>,
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    release: Option<ReleaseCallback>,
    is_dirty: bool,
}

impl WritePageGuard {
    /// # Safety
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            page_id,
            _frame: frame,
            data_guard: Some(data_guard),
            release: Some(release),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().expect("latch held")[..]
    }

    /// Returns the page bytes for mutation and marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data_guard.as_mut().expect("latch held")[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        if let Some(release) = self.release.take() {
            release(self.page_id, self.is_dirty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FrameId;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_read_page_guard_releases_on_drop() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        frame.copy_from(&data);

        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let guard = unsafe {
            ReadPageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, _| {
                    released_clone.store(true, Ordering::SeqCst);
                }),
            )
        };

        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(guard.data()[0], 42);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_page_guard_reports_dirty() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let dirty = Arc::new(AtomicBool::new(false));
        let dirty_clone = dirty.clone();

        let mut guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, is_dirty| {
                    dirty_clone.store(is_dirty, Ordering::SeqCst);
                }),
            )
        };

        guard.data_mut()[0] = 42;
        drop(guard);
        assert!(dirty.load(Ordering::SeqCst));

        let mut read_back = [0u8; PAGE_SIZE];
        frame.copy_to(&mut read_back);
        assert_eq!(read_back[0], 42);
    }

    #[test]
    fn test_write_page_guard_clean_without_mutation() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let dirty = Arc::new(AtomicBool::new(true));
        let dirty_clone = dirty.clone();

        let guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, is_dirty| {
                    dirty_clone.store(is_dirty, Ordering::SeqCst);
                }),
            )
        };

        let _ = guard.data()[0];
        drop(guard);
        assert!(!dirty.load(Ordering::SeqCst));
    }
}
