use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// FrameHeader is one slot of the buffer pool: a page-sized byte buffer
/// plus the metadata the pool needs to manage it. The data buffer sits
/// behind a reader/writer lock which doubles as the page latch used by
/// the index; pin count and the dirty flag are atomics so guard release
/// does not contend on the latch.
pub struct FrameHeader {
    /// The frame ID (index in the buffer pool)
    frame_id: FrameId,
    /// Raw ID of the page resident in this frame (INVALID_PAGE_ID if empty)
    page_id: AtomicU32,
    /// Number of outstanding handles on this frame
    pin_count: AtomicU32,
    /// Whether the frame bytes differ from the on-disk page
    is_dirty: AtomicBool,
    /// The page bytes; the RwLock is the page latch
    pub(crate) data: RwLock<Box<[u8; PAGE_SIZE]>>,
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
        loop {
            let current = self.pin_count.load(Ordering::Acquire);
            if current == 0 {
                return None;
            }
            if self
                .pin_count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current - 1);
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Overwrites the frame bytes from the given page-sized slice.
    pub fn copy_from(&self, data: &[u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        self.data.write().copy_from_slice(data);
    }

    /// Copies the frame bytes into the given page-sized slice.
    pub fn copy_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let guard = self.data.read();
        data.copy_from_slice(&**guard);
    }

    /// Returns the frame to its pristine state: no page, unpinned,
    /// clean, zeroed bytes.
    pub fn reset(&self) {
        self.page_id
            .store(INVALID_PAGE_ID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_new() {
        let frame = FrameHeader::new(FrameId::new(0));
        assert_eq!(frame.frame_id(), FrameId::new(0));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_header_pin_unpin() {
        let frame = FrameHeader::new(FrameId::new(0));

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.pin_count(), 2);

        assert_eq!(frame.unpin(), Some(1));
        assert_eq!(frame.unpin(), Some(0));
        assert_eq!(frame.unpin(), None);
    }

    #[test]
    fn test_frame_header_dirty_flag() {
        let frame = FrameHeader::new(FrameId::new(0));

        assert!(!frame.is_dirty());
        frame.set_dirty(true);
        assert!(frame.is_dirty());
        frame.set_dirty(false);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_header_data_round_trip() {
        let frame = FrameHeader::new(FrameId::new(0));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[PAGE_SIZE - 1] = 7;
        frame.copy_from(&data);

        let mut read_back = [0u8; PAGE_SIZE];
        frame.copy_to(&mut read_back);
        assert_eq!(read_back[0], 42);
        assert_eq!(read_back[PAGE_SIZE - 1], 7);
    }

    #[test]
    fn test_frame_header_reset() {
        let frame = FrameHeader::new(FrameId::new(0));

        frame.set_page_id(PageId::new(5));
        frame.pin();
        frame.set_dirty(true);
        let mut data = [1u8; PAGE_SIZE];
        frame.copy_from(&data);

        frame.reset();

        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());

        frame.copy_to(&mut data);
        assert_eq!(data[0], 0);
    }
}
