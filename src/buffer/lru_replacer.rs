use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::common::FrameId;

/// LRU replacement policy.
///
/// Tracks the frames that are eligible for eviction, ordered by the time
/// they became eligible (oldest at the front). Eviction order is strict
/// FIFO on unpin time: `victim` always hands out the frame that has been
/// idle the longest.
pub struct LruReplacer {
    state: Mutex<LruState>,
}

struct LruState {
    /// Evictable frames, least recently unpinned first
    queue: VecDeque<FrameId>,
    /// Upper bound on tracked frames (the buffer pool size)
    capacity: usize,
}

impl LruReplacer {
    /// Creates a replacer able to track up to `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            state: Mutex::new(LruState {
                queue: VecDeque::with_capacity(num_frames),
                capacity: num_frames,
            }),
        }
    }

    /// Removes and returns the least recently unpinned frame, or None if
    /// no frame is evictable.
    pub fn victim(&self) -> Option<FrameId> {
        self.state.lock().queue.pop_front()
    }

    /// Marks a frame as in use: it is no longer a candidate for
    /// eviction. No-op if the frame is not tracked.
    pub fn pin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if let Some(pos) = state.queue.iter().position(|&f| f == frame_id) {
            state.queue.remove(pos);
        }
    }

    /// Marks a frame as evictable. The buffer pool calls this when a
    /// frame's pin count drops to zero. No-op if the frame is already
    /// queued or the replacer is at capacity.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if state.queue.len() < state.capacity && !state.queue.contains(&frame_id) {
            state.queue.push_back(frame_id);
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().queue.len()
    }
}
