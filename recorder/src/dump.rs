//! Persisting the buffered window to a video file, immediately or after an
//! approval-gated delay.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::buffer::TemporalFrameBuffer;
use crate::encoder::{EncoderError, FrameEncoder, VideoSpec};
use crate::gate::{ApprovalGate, BlockingApprovalGate};
use crate::naming::dump_path_now;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpOutcome {
    Written { path: PathBuf, frames: u32 },
    /// The gate was not approved when the delay expired; nothing was written.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("destination {} already exists", .0.display())]
    DestinationExists(PathBuf),
    #[error("buffer is empty")]
    EmptyBuffer,
    #[error("encoding failed: {0}")]
    Encode(#[from] EncoderError),
    #[error("dump worker did not complete: {0}")]
    Aborted(String),
}

/// Snapshot `buffer` and encode it to `path`. Returns the number of frames
/// written.
///
/// Frames whose geometry differs from the first buffered frame are skipped,
/// since a single output file has one frame size.
pub fn dump_to_file(
    buffer: &TemporalFrameBuffer,
    path: &Path,
    overwrite_allowed: bool,
    encoder: &dyn FrameEncoder,
) -> Result<u32, DumpError> {
    if path.exists() && !overwrite_allowed {
        return Err(DumpError::DestinationExists(path.to_path_buf()));
    }

    let frames = buffer.snapshot();
    let first = frames.first().ok_or(DumpError::EmptyBuffer)?;
    let spec = VideoSpec {
        width: first.width(),
        height: first.height(),
        fps: buffer.fps(),
        overwrite: overwrite_allowed,
    };

    let mut session = encoder.open(path, &spec)?;
    let mut skipped = 0usize;
    for frame in &frames {
        if !frame.same_geometry(first) {
            skipped += 1;
            continue;
        }
        session.push_frame(frame)?;
    }
    if skipped > 0 {
        warn!(skipped, "dropped frames with a different size from the dump");
    }
    let written = session.finish()?;
    info!(path = %path.display(), frames = written, "saved buffer to file");
    Ok(written)
}

/// Where and when a delayed dump writes.
#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub destination: PathBuf,
    pub delay: Duration,
    pub overwrite_allowed: bool,
}

impl DumpRequest {
    pub fn new(destination: impl Into<PathBuf>, delay: Duration) -> Self {
        Self {
            destination: destination.into(),
            delay,
            overwrite_allowed: false,
        }
    }

    pub fn overwrite_allowed(mut self, allowed: bool) -> Self {
        self.overwrite_allowed = allowed;
        self
    }
}

struct DumpJob {
    buffer: Arc<TemporalFrameBuffer>,
    encoder: Arc<dyn FrameEncoder>,
    request: DumpRequest,
}

/// Fire-time logic shared by both scheduling strategies. Runs after the
/// delay has elapsed and the gate has been read.
fn settle(approved: bool, job: &DumpJob) -> Result<DumpOutcome, DumpError> {
    let destination = &job.request.destination;
    if !approved {
        info!(path = %destination.display(), "dump aborted, not approved");
        return Ok(DumpOutcome::Skipped);
    }
    match dump_to_file(
        &job.buffer,
        destination,
        job.request.overwrite_allowed,
        job.encoder.as_ref(),
    ) {
        Ok(frames) => Ok(DumpOutcome::Written {
            path: destination.clone(),
            frames,
        }),
        Err(e) => {
            warn!(path = %destination.display(), error = %e, "delayed dump failed");
            Err(e)
        }
    }
}

/// Schedules delayed, approval-gated dumps of one buffer.
///
/// The wait never touches the buffer or the gate. When it ends the gate is
/// read once: approved means snapshot and encode, anything else is a no-op.
/// There is no cancel beyond leaving the gate unapproved.
#[derive(Clone)]
pub struct DelayedDumpWorkflow {
    buffer: Arc<TemporalFrameBuffer>,
    encoder: Arc<dyn FrameEncoder>,
}

impl DelayedDumpWorkflow {
    pub fn new(buffer: Arc<TemporalFrameBuffer>, encoder: Arc<dyn FrameEncoder>) -> Self {
        Self { buffer, encoder }
    }

    fn job(&self, request: DumpRequest) -> DumpJob {
        DumpJob {
            buffer: Arc::clone(&self.buffer),
            encoder: Arc::clone(&self.encoder),
            request,
        }
    }

    /// Schedule a dump as a tokio task. Must be called within a runtime.
    /// The encode itself runs on the blocking pool.
    pub fn schedule(&self, request: DumpRequest, gate: ApprovalGate) -> PendingDump {
        let destination = request.destination.clone();
        let delay = request.delay;
        let job = self.job(request);
        let task_gate = gate.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let approved = task_gate.is_approved().await;
            tokio::task::spawn_blocking(move || settle(approved, &job))
                .await
                .map_err(|e| DumpError::Aborted(e.to_string()))?
        });

        PendingDump {
            gate,
            destination,
            task,
        }
    }

    /// Like `schedule`, but the gate is approved up front so the dump always
    /// writes once the delay passes.
    pub async fn schedule_approved(&self, request: DumpRequest) -> PendingDump {
        let gate = ApprovalGate::new();
        gate.approve().await;
        self.schedule(request, gate)
    }

    /// Schedule a dump to a timestamped file in `dir`, awaiting approval.
    pub fn schedule_in_dir(&self, dir: &Path, delay: Duration) -> PendingDump {
        self.schedule(DumpRequest::new(dump_path_now(dir), delay), ApprovalGate::new())
    }

    /// Schedule a dump on a dedicated thread that sleeps out the delay.
    pub fn schedule_threaded(
        &self,
        request: DumpRequest,
        gate: BlockingApprovalGate,
    ) -> Result<ThreadedDump, DumpError> {
        let destination = request.destination.clone();
        let delay = request.delay;
        let job = self.job(request);
        let thread_gate = gate.clone();

        let thread = std::thread::Builder::new()
            .name("delayed-dump".into())
            .spawn(move || {
                std::thread::sleep(delay);
                settle(thread_gate.is_approved(), &job)
            })
            .map_err(|e| DumpError::Aborted(e.to_string()))?;

        Ok(ThreadedDump {
            gate,
            destination,
            thread: Some(thread),
        })
    }

    /// Threaded counterpart of `schedule_approved`.
    pub fn schedule_approved_threaded(&self, request: DumpRequest) -> Result<ThreadedDump, DumpError> {
        let gate = BlockingApprovalGate::new();
        gate.approve();
        self.schedule_threaded(request, gate)
    }

    /// Threaded counterpart of `schedule_in_dir`.
    pub fn schedule_in_dir_threaded(
        &self,
        dir: &Path,
        delay: Duration,
    ) -> Result<ThreadedDump, DumpError> {
        self.schedule_threaded(
            DumpRequest::new(dump_path_now(dir), delay),
            BlockingApprovalGate::new(),
        )
    }
}

/// Handle to a dump scheduled with [`DelayedDumpWorkflow::schedule`].
#[must_use = "the gate and outcome of a dump are only reachable through its handle"]
pub struct PendingDump {
    gate: ApprovalGate,
    destination: PathBuf,
    task: tokio::task::JoinHandle<Result<DumpOutcome, DumpError>>,
}

impl PendingDump {
    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the dump to fire and return what it did.
    pub async fn outcome(self) -> Result<DumpOutcome, DumpError> {
        self.task
            .await
            .map_err(|e| DumpError::Aborted(e.to_string()))?
    }
}

/// Handle to a dump scheduled with [`DelayedDumpWorkflow::schedule_threaded`].
///
/// The handle owns the dump thread. Dropping it without `join` still waits
/// for the dump to fire, discarding the outcome.
#[must_use = "dropping a ThreadedDump blocks until the dump fires"]
pub struct ThreadedDump {
    gate: BlockingApprovalGate,
    destination: PathBuf,
    thread: Option<std::thread::JoinHandle<Result<DumpOutcome, DumpError>>>,
}

impl ThreadedDump {
    pub fn gate(&self) -> &BlockingApprovalGate {
        &self.gate
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Block until the dump has fired and return what it did.
    pub fn join(mut self) -> Result<DumpOutcome, DumpError> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<DumpOutcome, DumpError> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| DumpError::Aborted("dump thread already joined".into()))?;
        thread
            .join()
            .map_err(|_| DumpError::Aborted("dump thread panicked".into()))?
    }
}

impl Drop for ThreadedDump {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.join_thread() {
                debug!(path = %self.destination.display(), error = %e, "dropped threaded dump finished with error");
            }
        }
    }
}
