use rewind_common::frame::Frame;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const INITIAL_RESERVE: usize = 256;

/// Fixed-capacity ring of the most recent frames, covering the last
/// `temporal_capacity` at `fps`.
///
/// Capacity is `⌊seconds⌋ × fps` frames, fixed at construction. Appending at
/// capacity evicts the oldest frame. Insertion order is temporal order.
#[derive(Debug)]
pub struct TemporalFrameBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    fps: u32,
}

impl TemporalFrameBuffer {
    pub fn new(temporal_capacity: Duration, fps: u32) -> Result<Self, BufferError> {
        let capacity = usize::try_from(temporal_capacity.as_secs())
            .ok()
            .and_then(|secs| secs.checked_mul(fps as usize))
            .filter(|&frames| frames > 0)
            .ok_or(BufferError::InvalidConfiguration {
                fps,
                capacity_secs: temporal_capacity.as_secs_f64(),
            })?;
        Ok(Self {
            // grows on demand up to `capacity`
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(INITIAL_RESERVE))),
            capacity,
            fps,
        })
    }

    pub fn append(&self, frame: Frame) {
        let mut frames = self.lock();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    /// Ordered copy of the current contents, oldest first. The lock is
    /// released before returning, so appends can continue while the caller
    /// works with the copy.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer needs fps >= 1 and at least one second of capacity (fps={fps}, capacity={capacity_secs}s)")]
    InvalidConfiguration { fps: u32, capacity_secs: f64 },
}
