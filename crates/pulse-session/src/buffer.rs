//! Bounded sliding window of decoded frames.

use std::collections::VecDeque;
use std::sync::Arc;

use pulse_core::Frame;

/// Rolling frame window with FIFO eviction.
///
/// Frames are stored behind `Arc` so a snapshot handed to the estimator does
/// not copy pixel data and does not hold a borrow on the buffer.
#[derive(Debug)]
pub struct SessionBuffer {
    frames: VecDeque<Arc<Frame>>,
    capacity: usize,
}

impl SessionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, evicting from the head past the cap.
    pub fn append(&mut self, frame: Arc<Frame>) {
        self.frames.push_back(frame);
        while self.frames.len() > self.capacity {
            let _ = self.frames.pop_front();
        }
    }

    /// The most recent `count` frames (fewer if unavailable), oldest first.
    pub fn snapshot(&self, count: usize) -> Vec<Arc<Frame>> {
        let skip = self.frames.len().saturating_sub(count);
        self.frames.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
