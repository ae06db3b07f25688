//! Live network stream source with reconnection.

use rewind_common::frame::Frame;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::decoder::{DecodeError, Interrupter, MediaDecoder, MediaLocator, StreamOptions};
use crate::signal::Shutdown;
use crate::slot::LatestFrame;
use crate::source::{FrameSource, SourceError};

/// Where the acquisition thread currently is in its reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Streaming,
    Backoff,
}

#[derive(Debug, Clone)]
pub struct NetworkStreamConfig {
    pub url: String,
    pub options: StreamOptions,
    pub reconnect_base_delay: Duration,
    pub reconnect_cap: Duration,
    /// How long `read` waits for a first frame before returning `None`.
    pub read_timeout: Duration,
}

impl NetworkStreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: StreamOptions::default(),
            reconnect_base_delay: Duration::from_secs(5),
            reconnect_cap: Duration::from_secs(30),
            read_timeout: Duration::from_secs(1),
        }
    }
}

struct Shared {
    latest: LatestFrame,
    shutdown: Shutdown,
    interrupter: Mutex<Option<Interrupter>>,
    status: Mutex<(StreamState, u32)>,
}

impl Shared {
    fn set_status(&self, state: StreamState, attempts: u32) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = (state, attempts);
    }

    fn status(&self) -> (StreamState, u32) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_interrupter(&self, interrupter: Option<Interrupter>) {
        *self.interrupter.lock().unwrap_or_else(PoisonError::into_inner) = interrupter;
    }
}

/// Frame source that decodes a remote stream on its own thread,
/// independent of how often the consumer reads.
///
/// The thread cycles `Connecting → Streaming → (error) → Backoff →
/// Connecting` until `stop`. Each decoded frame replaces the cached one; any
/// error clears it, so a reader never sees a frame from a dead connection.
/// Backoff waits `min(base × attempts, cap)`, where `attempts` counts
/// consecutive failures and resets once a connection opens.
pub struct NetworkStreamFrameSource {
    shared: Arc<Shared>,
    read_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkStreamFrameSource {
    pub fn spawn(
        decoder: Arc<dyn MediaDecoder>,
        config: NetworkStreamConfig,
    ) -> Result<Self, SourceError> {
        if config.reconnect_cap.is_zero() {
            return Err(SourceError::InvalidConfiguration(
                "reconnect cap must be positive".into(),
            ));
        }
        let locator = MediaLocator::Stream {
            url: config.url.clone(),
            options: config.options.clone(),
        };
        let backoff = Backoff::new(config.reconnect_base_delay, config.reconnect_cap);
        let shared = Arc::new(Shared {
            latest: LatestFrame::new(),
            shutdown: Shutdown::new(),
            interrupter: Mutex::new(None),
            status: Mutex::new((StreamState::Disconnected, 0)),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("stream-source".into())
                .spawn(move || run_loop(decoder.as_ref(), &locator, backoff, &shared))
                .map_err(SourceError::Spawn)?
        };

        Ok(Self {
            shared,
            read_timeout: config.read_timeout,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn state(&self) -> StreamState {
        self.shared.status().0
    }

    /// Consecutive failed connection attempts since the last success.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.status().1
    }
}

fn run_loop(decoder: &dyn MediaDecoder, locator: &MediaLocator, mut backoff: Backoff, shared: &Shared) {
    while !shared.shutdown.is_triggered() {
        shared.set_status(StreamState::Connecting, backoff.attempts());
        let result = stream_once(decoder, locator, &mut backoff, shared);

        shared.set_interrupter(None);
        shared.latest.clear();

        let Err(e) = result else {
            break;
        };
        if shared.shutdown.is_triggered() {
            break;
        }

        let delay = backoff.next_delay();
        shared.set_status(StreamState::Backoff, backoff.attempts());
        warn!(
            url = %locator,
            error = %e,
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "stream error, reconnecting"
        );
        if shared.shutdown.wait_timeout(delay) {
            break;
        }
    }
    shared.set_status(StreamState::Disconnected, backoff.attempts());
    debug!(url = %locator, "stream source loop exited");
}

/// Open one connection and pump frames until it fails. Returns `Ok` only
/// when the loop should exit because of `stop`.
fn stream_once(
    decoder: &dyn MediaDecoder,
    locator: &MediaLocator,
    backoff: &mut Backoff,
    shared: &Shared,
) -> Result<(), DecodeError> {
    let mut session = decoder.open(locator)?;
    shared.set_interrupter(Some(session.interrupter()));
    // stop() may have fired while open() was blocking.
    if shared.shutdown.is_triggered() {
        return Ok(());
    }

    backoff.reset();
    shared.set_status(StreamState::Streaming, 0);
    info!(url = %locator, "connected to stream");

    loop {
        let next = session.next_frame();
        if shared.shutdown.is_triggered() {
            return Ok(());
        }
        match next {
            Ok(Some(frame)) => shared.latest.publish(frame),
            Ok(None) => return Err(DecodeError::EndOfStream),
            Err(e) => return Err(e),
        }
    }
}

impl FrameSource for NetworkStreamFrameSource {
    fn read(&self) -> Option<Frame> {
        self.shared.latest.wait_latest(self.read_timeout)
    }

    fn stop(&self) {
        self.shared.shutdown.trigger();
        let interrupter = self
            .shared
            .interrupter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(interrupter) = interrupter {
            interrupter.interrupt();
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("stream source thread panicked");
            }
        }
        self.shared.latest.clear();
    }
}

impl Drop for NetworkStreamFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
