use std::sync::atomic::{AtomicU64, Ordering};

use frame_snap_common::bridge::{self, DecodeError, Frame};
use frame_snap_common::frame::{FrameError, ImageMessage};
use tracing::{debug, dispatcher, error, info, Dispatch};

use crate::mailbox::FrameMailbox;

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("malformed image message: {0}")]
    Wire(#[from] FrameError),
    #[error("failed to convert image: {0}")]
    Decode(#[from] DecodeError),
}

/// Decodes incoming image messages into the shared [`FrameMailbox`].
///
/// A failed decode is logged and leaves the held frame untouched.
pub struct FrameReceiver {
    mailbox: FrameMailbox,
    dispatch: Dispatch,
    decoded: AtomicU64,
    failed: AtomicU64,
}

impl FrameReceiver {
    pub fn new(mailbox: FrameMailbox, dispatch: Dispatch) -> Self {
        Self {
            mailbox,
            dispatch,
            decoded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Handle one raw bus payload. Returns `true` if the held frame was replaced.
    pub fn on_payload(&self, payload: &[u8]) -> bool {
        match ImageMessage::deserialize(payload) {
            Ok(msg) => self.on_message(&msg),
            Err(e) => {
                self.reject(&ReceiveError::from(e), payload.len());
                false
            }
        }
    }

    /// Handle one image message. Returns `true` if the held frame was replaced.
    pub fn on_message(&self, msg: &ImageMessage) -> bool {
        match bridge::decode(msg) {
            Ok(frame) => {
                self.accept(frame, msg.encoding());
                true
            }
            Err(e) => {
                self.reject(&ReceiveError::from(e), msg.payload_size());
                false
            }
        }
    }

    fn accept(&self, frame: Frame, encoding: &str) {
        let first = self.decoded.fetch_add(1, Ordering::Relaxed) == 0;
        dispatcher::with_default(&self.dispatch, || {
            if first {
                info!(
                    width = frame.width(),
                    height = frame.height(),
                    encoding,
                    "first frame received"
                );
            } else {
                debug!(seq = frame.seq, ts = frame.captured_at_ms, "frame updated");
            }
        });
        self.mailbox.put(frame);
    }

    fn reject(&self, err: &ReceiveError, size: usize) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        dispatcher::with_default(&self.dispatch, || {
            error!(error = %err, size, "error converting image, keeping previous frame");
        });
    }

    pub fn mailbox(&self) -> &FrameMailbox {
        &self.mailbox
    }

    pub fn decoded_count(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
