use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::common::{PageId, Result, TaprootError, PAGE_SIZE};

use super::DiskManager;

/// A disk I/O request carrying its own buffer and a reply channel.
enum DiskRequest {
    Read {
        page_id: PageId,
        reply: Sender<Result<Box<[u8; PAGE_SIZE]>>>,
    },
    Write {
        page_id: PageId,
        data: Box<[u8; PAGE_SIZE]>,
        reply: Sender<Result<()>>,
    },
}

/// DiskScheduler funnels page I/O through a background worker thread.
/// Requests are queued on a channel; the synchronous wrappers block on
/// the reply. Dropping the scheduler closes the queue and joins the
/// worker after it drains the remaining requests.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Option<Sender<DiskRequest>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = unbounded::<DiskRequest>();

        let dm = Arc::clone(&disk_manager);
        let worker_handle = thread::spawn(move || {
            Self::run_worker(dm, receiver);
        });

        Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle: Some(worker_handle),
        }
    }

    /// Reads a page through the worker and blocks until it completes.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (reply, response) = crossbeam_channel::bounded(1);
        self.send(DiskRequest::Read { page_id, reply })?;

        let buf = response
            .recv()
            .map_err(|e| TaprootError::DiskScheduler(format!("read reply lost: {e}")))??;
        data.copy_from_slice(&buf[..]);
        Ok(())
    }

    /// Writes a page through the worker and blocks until it completes.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);

        let (reply, response) = crossbeam_channel::bounded(1);
        self.send(DiskRequest::Write {
            page_id,
            data: buf,
            reply,
        })?;

        response
            .recv()
            .map_err(|e| TaprootError::DiskScheduler(format!("write reply lost: {e}")))?
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn send(&self, request: DiskRequest) -> Result<()> {
        let sender = self
            .request_sender
            .as_ref()
            .ok_or_else(|| TaprootError::DiskScheduler("scheduler is shut down".into()))?;
        sender
            .send(request)
            .map_err(|e| TaprootError::DiskScheduler(format!("failed to queue request: {e}")))
    }

    fn run_worker(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        // Exits when every sender is dropped.
        for request in receiver.iter() {
            match request {
                DiskRequest::Read { page_id, reply } => {
                    let mut buf = Box::new([0u8; PAGE_SIZE]);
                    let result = disk_manager.read_page(page_id, &mut buf[..]).map(|_| buf);
                    let _ = reply.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    reply,
                } => {
                    let _ = reply.send(disk_manager.write_page(page_id, &data[..]));
                }
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.request_sender.take();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
