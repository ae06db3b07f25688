//! Scripted decoder fakes shared by the source tests.

use rewind_common::frame::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::decoder::{DecodeError, DecodeSession, Interrupter, MediaDecoder, MediaLocator};
use crate::signal::Shutdown;

#[derive(Clone, Default)]
pub(crate) struct Counter(Arc<AtomicU64>);

impl Counter {
    pub(crate) fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub(crate) struct Flag(Arc<AtomicBool>);

impl Flag {
    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn numbered_frame(n: u64) -> Frame {
    Frame::filled(2, 2, (n % 256) as u8).expect("valid test frame")
}

/// What happens once a scripted stream runs out of frames.
#[derive(Clone, Copy)]
pub(crate) enum StreamEnd {
    Eof,
    Error,
    /// Block in `next_frame` until interrupted.
    Block,
}

/// A fake media handle. Frame `n` is a 2x2 frame filled with `n`.
pub(crate) struct ScriptedSession {
    frames: u64,
    report_count: bool,
    end: StreamEnd,
    failures_left: u64,
    position: u64,
    pace: Duration,
    seeks: Counter,
    released: Flag,
    interrupted: Arc<Shutdown>,
}

impl ScriptedSession {
    /// A seekable file of `frames` frames that reports its length.
    pub(crate) fn looping(frames: u64) -> Self {
        Self {
            frames,
            report_count: true,
            end: StreamEnd::Eof,
            failures_left: 0,
            position: 0,
            pace: Duration::ZERO,
            seeks: Counter::default(),
            released: Flag::default(),
            interrupted: Arc::new(Shutdown::new()),
        }
    }

    /// A live stream producing `frames` frames roughly every 2ms, then `end`.
    pub(crate) fn live(frames: u64, end: StreamEnd) -> Self {
        let mut session = Self::looping(frames);
        session.report_count = false;
        session.end = end;
        session.pace = Duration::from_millis(2);
        session
    }

    pub(crate) fn without_frame_count(mut self) -> Self {
        self.report_count = false;
        self
    }

    pub(crate) fn with_failures_first(mut self, failures: u64) -> Self {
        self.failures_left = failures;
        self
    }

    pub(crate) fn seek_counter(&self) -> Counter {
        self.seeks.clone()
    }

    pub(crate) fn released_flag(&self) -> Flag {
        self.released.clone()
    }
}

impl DecodeSession for ScriptedSession {
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.interrupted.is_triggered() {
            return Err(DecodeError::Interrupted);
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(DecodeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "scripted decode failure",
            )));
        }
        if self.position >= self.frames {
            return match self.end {
                StreamEnd::Eof => Ok(None),
                StreamEnd::Error => Err(DecodeError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "scripted connection drop",
                ))),
                StreamEnd::Block => {
                    self.interrupted.wait_timeout(Duration::from_secs(3600));
                    Err(DecodeError::Interrupted)
                }
            };
        }
        if !self.pace.is_zero() && self.interrupted.wait_timeout(self.pace) {
            return Err(DecodeError::Interrupted);
        }
        let frame = numbered_frame(self.position);
        self.position += 1;
        Ok(Some(frame))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn frame_count(&self) -> Option<u64> {
        self.report_count.then_some(self.frames)
    }

    fn seek_to_start(&mut self) -> Result<(), DecodeError> {
        self.seeks.bump();
        self.position = 0;
        Ok(())
    }

    fn interrupter(&self) -> Interrupter {
        let interrupted = Arc::clone(&self.interrupted);
        Interrupter::new(move || interrupted.trigger())
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.released.set();
    }
}

/// One scripted response to `MediaDecoder::open`.
pub(crate) enum OpenScript {
    Fail,
    Stream { frames: u64, end: StreamEnd },
}

/// Decoder that replays a list of open outcomes, then repeats `fallback`.
pub(crate) struct ScriptedDecoder {
    script: Mutex<VecDeque<OpenScript>>,
    fallback: fn() -> OpenScript,
    opens: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedDecoder {
    pub(crate) fn new(script: Vec<OpenScript>, fallback: fn() -> OpenScript) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            opens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Instants at which `open` was called, in order.
    pub(crate) fn open_log(&self) -> Arc<Mutex<Vec<Instant>>> {
        Arc::clone(&self.opens)
    }
}

impl MediaDecoder for ScriptedDecoder {
    fn open(&self, locator: &MediaLocator) -> Result<Box<dyn DecodeSession>, DecodeError> {
        self.opens.lock().unwrap().push(Instant::now());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(self.fallback);
        match step {
            OpenScript::Fail => Err(DecodeError::Probe {
                target: locator.to_string(),
                reason: "scripted open failure".into(),
            }),
            OpenScript::Stream { frames, end } => Ok(Box::new(ScriptedSession::live(frames, end))),
        }
    }
}
