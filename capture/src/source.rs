use rewind_common::frame::Frame;

use crate::decoder::DecodeError;

/// Produces the most recent decoded frame on demand.
///
/// Implementations run their own acquisition thread; `read` only copies out
/// whatever that thread last cached, so it is safe to call repeatedly from a
/// single consumer thread.
pub trait FrameSource: Send + Sync {
    /// The latest frame, or `None` if nothing has been decoded yet (or the
    /// cached frame was dropped after a stream error).
    fn read(&self) -> Option<Frame>;

    /// Halt the acquisition thread, wait for it to exit and release the
    /// underlying media handle. Calling it again is a no-op. A stopped
    /// source cannot be restarted.
    fn stop(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid source configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to open media: {0}")]
    Open(#[from] DecodeError),
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(std::io::Error),
}
