use rewind_common::frame::{Frame, FrameError};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where a decoder should read media from.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaLocator {
    /// Finite, seekable media file.
    File(PathBuf),
    /// Live network stream (e.g. `rtsp://camera/stream`).
    Stream { url: String, options: StreamOptions },
}

impl fmt::Display for MediaLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaLocator::File(path) => write!(f, "{}", path.display()),
            MediaLocator::Stream { url, .. } => f.write_str(url),
        }
    }
}

/// Transport knobs passed straight through to the demuxer. They favour low
/// latency and small buffers over smoothness.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    /// RTSP lower transport, `"tcp"` by default.
    pub transport: String,
    /// Socket-level timeout for connect and reads.
    pub io_timeout: Duration,
    pub probe_size: u32,
    pub analyze_duration: Duration,
    pub max_delay: Duration,
    /// Disable demuxer buffering (`-fflags nobuffer -flags low_delay`).
    pub low_latency: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            transport: "tcp".into(),
            io_timeout: Duration::from_secs(5),
            probe_size: 4096,
            analyze_duration: Duration::from_secs(1),
            max_delay: Duration::from_millis(500),
            low_latency: true,
        }
    }
}

/// Cloneable callback that unblocks a pending `DecodeSession::next_frame`
/// from another thread. After it fires the session is unusable.
#[derive(Clone)]
pub struct Interrupter(Arc<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// An interrupter for sessions that never block.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn interrupt(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interrupter")
    }
}

/// Opens media for decoding. Implementations wrap a codec library or tool.
pub trait MediaDecoder: Send + Sync {
    fn open(&self, locator: &MediaLocator) -> Result<Box<dyn DecodeSession>, DecodeError>;
}

/// An open decoding handle. Dropping it releases the underlying resource.
pub trait DecodeSession: Send {
    /// Decode the next frame. `Ok(None)` signals end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError>;

    /// Index of the next frame `next_frame` would return.
    fn position(&self) -> u64;

    /// Total frames in the media, when the container reports it.
    fn frame_count(&self) -> Option<u64>;

    fn seek_to_start(&mut self) -> Result<(), DecodeError>;

    fn interrupter(&self) -> Interrupter;
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to probe {target}: {reason}")]
    Probe { target: String, reason: String },
    #[error("decoder pipe error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream ended")]
    EndOfStream,
    #[error("decoded frame is malformed: {0}")]
    Frame(#[from] FrameError),
    #[error("decoder was interrupted")]
    Interrupted,
}
