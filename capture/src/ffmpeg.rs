//! Decoder collaborator backed by the `ffmpeg` and `ffprobe` command-line tools.
//!
//! Geometry and frame count come from `ffprobe`; pixels come from an `ffmpeg`
//! child that writes packed bgr24 frames to its stdout.

use rewind_common::frame::Frame;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::decoder::{DecodeError, DecodeSession, Interrupter, MediaDecoder, MediaLocator};

#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit binaries instead of looking them up on PATH.
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn probe(&self, locator: &MediaLocator) -> Result<ProbeInfo, DecodeError> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height,nb_frames"])
            .args(["-of", "default=noprint_wrappers=1"])
            .args(input_args(locator))
            .stdin(Stdio::null());

        let output = cmd.output().map_err(|source| DecodeError::Spawn {
            program: self.ffprobe.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(DecodeError::Probe {
                target: locator.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_probe(&locator.to_string(), &String::from_utf8_lossy(&output.stdout))
    }
}

impl MediaDecoder for FfmpegDecoder {
    fn open(&self, locator: &MediaLocator) -> Result<Box<dyn DecodeSession>, DecodeError> {
        let probe = self.probe(locator)?;
        debug!(
            media = %locator,
            width = probe.width,
            height = probe.height,
            frame_count = ?probe.frame_count,
            "probed media"
        );
        let session = FfmpegSession::spawn(self.ffmpeg.clone(), locator.clone(), probe)?;
        Ok(Box::new(session))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProbeInfo {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) frame_count: Option<u64>,
}

/// Parse `key=value` lines produced by `ffprobe -of default=noprint_wrappers=1`.
pub(crate) fn parse_probe(target: &str, text: &str) -> Result<ProbeInfo, DecodeError> {
    let mut width = None;
    let mut height = None;
    let mut frame_count = None;

    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            // Only the first video stream counts.
            "width" if width.is_none() => width = value.parse::<u32>().ok(),
            "height" if height.is_none() => height = value.parse::<u32>().ok(),
            "nb_frames" if frame_count.is_none() => {
                frame_count = value.parse::<u64>().ok().filter(|&n| n > 0)
            }
            _ => {}
        }
    }

    match (width, height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Ok(ProbeInfo {
            width,
            height,
            frame_count,
        }),
        _ => Err(DecodeError::Probe {
            target: target.to_string(),
            reason: "no video stream with known dimensions".into(),
        }),
    }
}

/// Demuxer arguments up to and including `-i <input>`.
pub(crate) fn input_args(locator: &MediaLocator) -> Vec<String> {
    match locator {
        MediaLocator::File(path) => vec!["-i".into(), path.display().to_string()],
        MediaLocator::Stream { url, options } => {
            let mut args = Vec::new();
            if url.starts_with("rtsp") {
                args.push("-rtsp_transport".into());
                args.push(options.transport.clone());
            }
            args.extend([
                "-timeout".into(),
                options.io_timeout.as_micros().to_string(),
                "-probesize".into(),
                options.probe_size.to_string(),
                "-analyzeduration".into(),
                options.analyze_duration.as_micros().to_string(),
                "-max_delay".into(),
                options.max_delay.as_micros().to_string(),
            ]);
            if options.low_latency {
                args.extend([
                    "-fflags".into(),
                    "nobuffer".into(),
                    "-flags".into(),
                    "low_delay".into(),
                ]);
            }
            args.push("-i".into());
            args.push(url.clone());
            args
        }
    }
}

struct FfmpegSession {
    program: PathBuf,
    locator: MediaLocator,
    probe: ProbeInfo,
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    position: u64,
}

impl FfmpegSession {
    fn spawn(program: PathBuf, locator: MediaLocator, probe: ProbeInfo) -> Result<Self, DecodeError> {
        let (child, stdout) = spawn_decoder(&program, &locator)?;
        Ok(Self {
            program,
            locator,
            probe,
            child: Arc::new(Mutex::new(child)),
            stdout,
            position: 0,
        })
    }
}

fn spawn_decoder(
    program: &Path,
    locator: &MediaLocator,
) -> Result<(Child, ChildStdout), DecodeError> {
    let mut cmd = Command::new(program);
    cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"])
        .args(input_args(locator))
        .args(["-an", "-f", "rawvideo", "-pix_fmt", "bgr24", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|source| DecodeError::Spawn {
        program: program.display().to_string(),
        source,
    })?;
    let stdout = child.stdout.take().ok_or_else(|| DecodeError::Spawn {
        program: program.display().to_string(),
        source: io::Error::new(io::ErrorKind::Other, "could not get stdout handle"),
    })?;

    debug!(media = %locator, "ffmpeg decoder started");
    Ok((child, stdout))
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        // Already exited is the common case here.
        if e.kind() != io::ErrorKind::InvalidInput {
            warn!(error = %e, "failed to kill ffmpeg decoder");
        }
    }
    let _ = child.wait();
}

/// Fill `buf` as far as the reader allows. Returns the number of bytes read,
/// which is short only at end of stream.
pub(crate) fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl DecodeSession for FfmpegSession {
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        let mut pixels = vec![0u8; Frame::byte_len_for(self.probe.width, self.probe.height)];
        let filled = read_full(&mut self.stdout, &mut pixels)?;
        if filled < pixels.len() {
            // A truncated trailing frame is treated the same as a clean EOF.
            return Ok(None);
        }
        self.position += 1;
        Ok(Some(Frame::new(pixels, self.probe.width, self.probe.height)?))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn frame_count(&self) -> Option<u64> {
        self.probe.frame_count
    }

    fn seek_to_start(&mut self) -> Result<(), DecodeError> {
        let (child, stdout) = spawn_decoder(&self.program, &self.locator)?;
        let mut current = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        reap(&mut current);
        *current = child;
        self.stdout = stdout;
        self.position = 0;
        Ok(())
    }

    fn interrupter(&self) -> Interrupter {
        let child = Arc::clone(&self.child);
        Interrupter::new(move || {
            let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = child.kill();
        })
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        reap(&mut child);
    }
}
