use std::sync::{Arc, Mutex, PoisonError};

use frame_snap_common::bridge::Frame;

/// Single-slot, last-writer-wins handoff of the newest decoded frame.
///
/// Writers replace the held `Arc<Frame>`; readers clone the `Arc` out, so a
/// reader never observes a partially replaced frame and never blocks a writer
/// for longer than a pointer swap.
#[derive(Clone, Default)]
pub struct FrameMailbox {
    slot: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, frame: Frame) {
        let frame = Arc::new(frame);
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    /// Snapshot of the held frame, if any.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
