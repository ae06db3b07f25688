//! Loops a finite media file forever.

use rewind_common::frame::Frame;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::decoder::{DecodeSession, MediaDecoder, MediaLocator};
use crate::signal::Shutdown;
use crate::slot::LatestFrame;
use crate::source::{FrameSource, SourceError};

/// Frame source over a seekable file that rewinds to the first frame when it
/// reaches the end, turning a finite clip into an endless feed.
///
/// A dedicated thread decodes one frame every `1/fps` and caches it. Decode
/// failures are swallowed: the cached frame simply does not advance and the
/// next tick tries again.
pub struct CyclicFileFrameSource {
    latest: Arc<LatestFrame>,
    shutdown: Arc<Shutdown>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CyclicFileFrameSource {
    /// Open `path` with `decoder` and start looping it.
    pub fn open(
        decoder: &dyn MediaDecoder,
        path: impl AsRef<Path>,
        fps: u32,
    ) -> Result<Self, SourceError> {
        let locator = MediaLocator::File(path.as_ref().to_path_buf());
        let session = decoder.open(&locator)?;
        info!(path = %locator, fps, "opened looping file source");
        Self::spawn(session, fps)
    }

    /// Start looping an already opened session. The session is owned by the
    /// acquisition thread and dropped when the source stops.
    pub fn spawn(session: Box<dyn DecodeSession>, fps: u32) -> Result<Self, SourceError> {
        if fps == 0 {
            return Err(SourceError::InvalidConfiguration(
                "fps must be at least 1".into(),
            ));
        }
        let interval = Duration::from_secs_f64(1.0 / fps as f64);
        let latest = Arc::new(LatestFrame::new());
        let shutdown = Arc::new(Shutdown::new());

        let worker = {
            let latest = Arc::clone(&latest);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("cyclic-source".into())
                .spawn(move || run_loop(session, interval, &latest, &shutdown))
                .map_err(SourceError::Spawn)?
        };

        Ok(Self {
            latest,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }
}

fn run_loop(
    mut session: Box<dyn DecodeSession>,
    interval: Duration,
    latest: &LatestFrame,
    shutdown: &Shutdown,
) {
    loop {
        if let Some(count) = session.frame_count() {
            if session.position() >= count.saturating_sub(1) {
                rewind(session.as_mut());
            }
        }

        match session.next_frame() {
            Ok(Some(frame)) => latest.publish(frame),
            // Container did not report a frame count; loop on EOF instead.
            Ok(None) => rewind(session.as_mut()),
            Err(e) => debug!(error = %e, "decode failed, retrying next tick"),
        }

        if shutdown.wait_timeout(interval) {
            break;
        }
    }
    debug!("cyclic source loop exited");
}

fn rewind(session: &mut dyn DecodeSession) {
    if let Err(e) = session.seek_to_start() {
        warn!(error = %e, "failed to rewind looping source");
    }
}

impl FrameSource for CyclicFileFrameSource {
    fn read(&self) -> Option<Frame> {
        self.latest.latest()
    }

    fn stop(&self) {
        self.shutdown.trigger();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("cyclic source thread panicked");
            }
        }
    }
}

impl Drop for CyclicFileFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
