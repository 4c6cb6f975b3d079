use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::common::{PageId, Result, PAGE_SIZE};

/// DiskManager is responsible for reading and writing fixed-size pages
/// to/from a single database file. It hands out page IDs and recycles
/// deallocated ones.
pub struct DiskManager {
    /// The database file; the mutex serializes cursor movement
    file: Mutex<File>,
    /// High-water mark of allocated page IDs
    num_pages: AtomicU32,
    /// Deallocated page IDs available for reuse
    free_pages: Mutex<Vec<PageId>>,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens (or creates) the database file at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(db_path.as_ref())?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file: Mutex::new(file),
            num_pages: AtomicU32::new(num_pages),
            free_pages: Mutex::new(Vec::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Reads a page from disk into the provided buffer.
    /// Short reads past the end of the file are zero-filled: a page that
    /// was allocated but never written reads back as all zeroes.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let byte_offset = (page_id.as_u32() as u64) * (PAGE_SIZE as u64);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;

        let bytes_read = file.read(data)?;
        if bytes_read < PAGE_SIZE {
            data[bytes_read..].fill(0);
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");

        let byte_offset = (page_id.as_u32() as u64) * (PAGE_SIZE as u64);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a page on disk and returns its ID, preferring a recycled
    /// ID over extending the file. The page is zeroed on disk before the
    /// ID is handed out.
    pub fn allocate_page(&self) -> Result<PageId> {
        let recycled = self.free_pages.lock().pop();
        let page_id = match recycled {
            Some(page_id) => page_id,
            None => PageId::new(self.num_pages.fetch_add(1, Ordering::SeqCst)),
        };

        let zeros = [0u8; PAGE_SIZE];
        self.write_page(page_id, &zeros)?;

        trace!(page_id = page_id.as_u32(), "allocated page");
        Ok(page_id)
    }

    /// Returns a page ID to the allocator for later reuse.
    pub fn deallocate_page(&self, page_id: PageId) {
        trace!(page_id = page_id.as_u32(), "deallocated page");
        self.free_pages.lock().push(page_id);
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}
