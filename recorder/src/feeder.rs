use rewind_capture::{FrameSource, Shutdown};
use rewind_common::frame::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::buffer::TemporalFrameBuffer;

/// What the feeder does on a tick where the source has no frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbsentFramePolicy {
    /// Append nothing; the window simply holds fewer frames.
    #[default]
    Skip,
    /// Append the last frame seen again so the window keeps its cadence.
    RepeatLast,
}

/// Background pacing loop pulling from a `FrameSource` into a
/// `TemporalFrameBuffer` at the buffer's frame rate.
///
/// Ticks are anchored to an absolute schedule advancing by exactly one
/// period per iteration, so a slow `read` delays only its own tick instead
/// of shifting every later one.
pub struct BufferFeeder {
    shutdown: Arc<Shutdown>,
    appended: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl BufferFeeder {
    pub fn start(
        buffer: Arc<TemporalFrameBuffer>,
        source: Arc<dyn FrameSource>,
        policy: AbsentFramePolicy,
    ) -> Result<Self, FeederError> {
        let fps = buffer.fps();
        if fps == 0 {
            return Err(FeederError::InvalidConfiguration(fps));
        }
        let period = Duration::from_secs_f64(1.0 / fps as f64);
        let shutdown = Arc::new(Shutdown::new());
        let appended = Arc::new(AtomicU64::new(0));

        let worker = {
            let shutdown = Arc::clone(&shutdown);
            let appended = Arc::clone(&appended);
            std::thread::Builder::new()
                .name("buffer-feeder".into())
                .spawn(move || {
                    run_loop(&buffer, source.as_ref(), period, policy, &shutdown, &appended)
                })
                .map_err(FeederError::Spawn)?
        };

        info!(fps, ?policy, "buffer feeder started");
        Ok(Self {
            shutdown,
            appended,
            worker: Some(worker),
        })
    }

    /// Frames appended so far, repeats included.
    pub fn frames_appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Signal the loop to exit and wait for the thread to finish.
    pub fn stop(&mut self) {
        self.shutdown.trigger();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("buffer feeder thread panicked");
            }
            info!(appended = self.frames_appended(), "buffer feeder stopped");
        }
    }
}

fn run_loop(
    buffer: &TemporalFrameBuffer,
    source: &dyn FrameSource,
    period: Duration,
    policy: AbsentFramePolicy,
    shutdown: &Shutdown,
    appended: &AtomicU64,
) {
    let mut next_tick = Instant::now();
    let mut last: Option<Frame> = None;

    while !shutdown.is_triggered() {
        // May block, e.g. while a stream source waits for its first frame.
        let frame = match (source.read(), policy) {
            (Some(frame), AbsentFramePolicy::RepeatLast) => {
                last = Some(frame.clone());
                Some(frame)
            }
            (Some(frame), AbsentFramePolicy::Skip) => Some(frame),
            (None, AbsentFramePolicy::RepeatLast) => last.clone(),
            (None, AbsentFramePolicy::Skip) => None,
        };
        match frame {
            Some(frame) => {
                buffer.append(frame);
                appended.fetch_add(1, Ordering::Relaxed);
            }
            None => debug!("source had no frame this tick"),
        }

        next_tick += period;
        let sleep = next_tick.saturating_duration_since(Instant::now());
        if !sleep.is_zero() && shutdown.wait_timeout(sleep) {
            break;
        }
    }
}

impl Drop for BufferFeeder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeederError {
    #[error("feeder needs fps >= 1, got {0}")]
    InvalidConfiguration(u32),
    #[error("failed to spawn feeder thread: {0}")]
    Spawn(std::io::Error),
}
