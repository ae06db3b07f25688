use rewind_common::config::DumpConfig;
use rewind_common::frame::Frame;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Geometry and rate of the file being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Whether an existing file at the destination may be replaced.
    pub overwrite: bool,
}

/// Opens destination files for a sequence of frames.
pub trait FrameEncoder: Send + Sync {
    fn open(&self, path: &Path, spec: &VideoSpec) -> Result<Box<dyn EncodeSession>, EncoderError>;
}

/// An open destination. Frames are written in order; `finish` finalizes the
/// container and returns the number of frames written.
pub trait EncodeSession: Send {
    fn push_frame(&mut self, frame: &Frame) -> Result<(), EncoderError>;

    fn finish(self: Box<Self>) -> Result<u32, EncoderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
    #[error("frame is {got_width}x{got_height}, encoder expects {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
}

/// Encodes raw bgr24 frames into an MP4 through an `ffmpeg` child process.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
    codec: String,
    crf: u32,
    preset: String,
}

impl FfmpegEncoder {
    pub fn new(codec: &str, crf: u32, preset: &str) -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            codec: codec.to_string(),
            crf,
            preset: preset.to_string(),
        }
    }

    pub fn from_config(config: &DumpConfig) -> Self {
        Self::new(&config.codec, config.crf, &config.preset)
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn vcodec(&self) -> &'static str {
        match self.codec.as_str() {
            "h265" => "libx265",
            _ => "libx264",
        }
    }

    pub(crate) fn args(&self, path: &Path, spec: &VideoSpec) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "bgr24",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.extend([
            "-s".into(),
            format!("{}x{}", spec.width, spec.height),
            "-r".into(),
            spec.fps.to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-c:v".into(),
            self.vcodec().into(),
            "-preset".into(),
            self.preset.clone(),
            "-crf".into(),
            self.crf.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-movflags".into(),
            "+faststart".into(),
            if spec.overwrite { "-y" } else { "-n" }.into(),
            path.display().to_string(),
        ]);
        args
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn open(&self, path: &Path, spec: &VideoSpec) -> Result<Box<dyn EncodeSession>, EncoderError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args(path, spec))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Checked before spawning: only output this session created, or was
        // told it may replace, is ever deleted on failure.
        let owns_output = spec.overwrite || !path.exists();

        let mut child = cmd
            .spawn()
            .map_err(|e| EncoderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("could not get stdin handle".into()));
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EncoderError::Spawn("could not get stderr handle".into()));
        let (stdin, stderr) = match (stdin, stderr) {
            (Ok(stdin), Ok(stderr)) => (stdin, stderr),
            (Err(e), _) | (_, Err(e)) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        // ffmpeg may report more than a pipe's worth of warnings while it is
        // still reading frames; keep stderr flowing so neither side blocks.
        let stderr_drain = std::thread::Builder::new()
            .name("ffmpeg-stderr".into())
            .spawn(move || {
                let mut raw = Vec::new();
                let mut stderr = stderr;
                let _ = stderr.read_to_end(&mut raw);
                String::from_utf8_lossy(&raw).into_owned()
            })
            .map_err(|e| EncoderError::Spawn(e.to_string()));
        let stderr_drain = match stderr_drain {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        debug!(
            codec = self.vcodec(),
            crf = self.crf,
            preset = self.preset,
            width = spec.width,
            height = spec.height,
            fps = spec.fps,
            output = path.display().to_string(),
            "ffmpeg encoder started"
        );

        Ok(Box::new(FfmpegSession {
            child: Some(child),
            stdin: Some(stdin),
            stderr_drain: Some(stderr_drain),
            output_path: path.to_path_buf(),
            owns_output,
            spec: *spec,
            frame_count: 0,
        }))
    }
}

struct FfmpegSession {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<String>>,
    output_path: PathBuf,
    /// Whether a failed encode may delete `output_path`.
    owns_output: bool,
    spec: VideoSpec,
    frame_count: u32,
}

impl FfmpegSession {
    fn collect_stderr(&mut self) -> String {
        self.stderr_drain
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }

    /// Remove whatever ffmpeg managed to write before failing.
    fn discard_output(&self) {
        if !self.owns_output {
            return;
        }
        match std::fs::remove_file(&self.output_path) {
            Ok(()) => warn!(
                output = self.output_path.display().to_string(),
                "removed partial output"
            ),
            Err(e) => debug!(error = %e, "no partial output to clean up"),
        }
    }
}

impl EncodeSession for FfmpegSession {
    fn push_frame(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        if frame.width() != self.spec.width || frame.height() != self.spec.height {
            return Err(EncoderError::FrameSize {
                width: self.spec.width,
                height: self.spec.height,
                got_width: frame.width(),
                got_height: frame.height(),
            });
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncoderError::Write("encoder already finished".into()))?;
        stdin
            .write_all(frame.data())
            .map_err(|e| EncoderError::Write(e.to_string()))?;
        self.frame_count += 1;
        Ok(())
    }

    /// Close stdin so ffmpeg sees the end of input, then wait for it to
    /// finalize the file.
    fn finish(mut self: Box<Self>) -> Result<u32, EncoderError> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| EncoderError::Wait("encoder already finished".into()))?;

        let status = match child.wait() {
            Ok(status) => status,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                self.discard_output();
                return Err(EncoderError::Wait(e.to_string()));
            }
        };
        let stderr = self.collect_stderr();

        if !status.success() {
            error!(stderr = %stderr, "ffmpeg exited with error");
            self.discard_output();
            return Err(EncoderError::FfmpegFailed(stderr));
        }

        info!(
            frame_count = self.frame_count,
            output = self.output_path.display().to_string(),
            "encoding complete"
        );
        Ok(self.frame_count)
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        // Abandoned before finish(): stop ffmpeg and drop the unfinished file.
        if let Some(mut child) = self.child.take() {
            drop(self.stdin.take());
            let _ = child.kill();
            let _ = child.wait();
            let _ = self.collect_stderr();
            self.discard_output();
        }
    }
}

/// Check whether ffmpeg is available on PATH. Logs a warning if not found.
pub async fn check_ffmpeg_available() {
    match tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
    {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; decoding and encoding may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                "ffmpeg not found on PATH; sources and dumps will fail. \
                 Install ffmpeg with libx264/libx265 support."
            );
        }
    }
}

/// Write an executable shell script standing in for ffmpeg. `$last` holds
/// the output path (ffmpeg's final argument).
#[cfg(all(test, unix))]
pub(crate) fn write_fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg.sh");
    std::fs::write(&path, format!("#!/bin/sh\nfor last; do :; done\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(overwrite: bool) -> VideoSpec {
        VideoSpec {
            width: 640,
            height: 360,
            fps: 20,
            overwrite,
        }
    }

    #[test]
    fn args_describe_raw_input_and_codec() {
        let encoder = FfmpegEncoder::new("h265", 28, "fast");
        let args = encoder.args(Path::new("/tmp/out.mp4"), &spec(false)).join(" ");
        assert!(args.contains("-f rawvideo -pix_fmt bgr24 -s 640x360 -r 20 -i pipe:0"));
        assert!(args.contains("-c:v libx265 -preset fast -crf 28"));
        assert!(args.ends_with("-n /tmp/out.mp4"));
    }

    #[test]
    fn overwrite_switches_to_yes() {
        let encoder = FfmpegEncoder::new("h264", 23, "veryfast");
        let args = encoder.args(Path::new("clip.mp4"), &spec(true));
        assert!(args.iter().any(|a| a == "libx264"));
        assert_eq!(args[args.len() - 2], "-y");
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let encoder = FfmpegEncoder::new("h264", 23, "veryfast")
            .with_binary("/nonexistent/definitely-not-ffmpeg");
        let result = encoder.open(Path::new("/tmp/never.mp4"), &spec(false));
        assert!(matches!(result, Err(EncoderError::Spawn(_))));
    }

    #[cfg(unix)]
    fn frame(width: u32, height: u32) -> Frame {
        Frame::filled(width, height, 0x40).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn failed_encode_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let fake = write_fake_ffmpeg(dir.path(), "echo partial > \"$last\"\nexit 1");
        let out = dir.path().join("out.mp4");
        let encoder = FfmpegEncoder::new("h264", 23, "veryfast").with_binary(fake);

        let mut session = encoder.open(&out, &VideoSpec { width: 64, height: 64, fps: 10, overwrite: false }).unwrap();
        // the child may already be gone, so writes can fail with a broken pipe
        let pushed = (0..20).try_for_each(|_| session.push_frame(&frame(64, 64)));
        let result = pushed.and_then(|()| session.finish());
        assert!(result.is_err());
        assert!(!out.exists(), "partial output was left behind");
    }

    #[cfg(unix)]
    #[test]
    fn abandoned_session_removes_its_output() {
        let dir = tempfile::tempdir().unwrap();
        let fake = write_fake_ffmpeg(dir.path(), "echo partial > \"$last\"\ncat > /dev/null");
        let out = dir.path().join("abandoned.mp4");
        let encoder = FfmpegEncoder::new("h264", 23, "veryfast").with_binary(fake);

        let mut session = encoder.open(&out, &VideoSpec { width: 8, height: 8, fps: 10, overwrite: false }).unwrap();
        session.push_frame(&frame(8, 8)).unwrap();
        drop(session);
        assert!(!out.exists());
    }

    #[cfg(unix)]
    #[test]
    fn failure_never_deletes_a_file_it_may_not_replace() {
        let dir = tempfile::tempdir().unwrap();
        let fake = write_fake_ffmpeg(dir.path(), "exit 1");
        let out = dir.path().join("keep.mp4");
        std::fs::write(&out, b"someone else's").unwrap();
        let encoder = FfmpegEncoder::new("h264", 23, "veryfast").with_binary(fake);

        let session = encoder.open(&out, &VideoSpec { width: 8, height: 8, fps: 10, overwrite: false }).unwrap();
        assert!(matches!(session.finish(), Err(EncoderError::FfmpegFailed(_))));
        assert_eq!(std::fs::read(&out).unwrap(), b"someone else's");
    }

    #[cfg(unix)]
    #[test]
    fn chatty_stderr_does_not_stall_the_encode() {
        let dir = tempfile::tempdir().unwrap();
        // well past a pipe buffer on stderr before any of stdin is read
        let fake = write_fake_ffmpeg(
            dir.path(),
            "head -c 300000 /dev/zero | tr '\\0' 'x' >&2\ncat > /dev/null\necho ok > \"$last\"",
        );
        let out = dir.path().join("chatty.mp4");
        let encoder = FfmpegEncoder::new("h264", 23, "veryfast").with_binary(fake);

        let mut session = encoder.open(&out, &VideoSpec { width: 100, height: 100, fps: 10, overwrite: false }).unwrap();
        for _ in 0..10 {
            session.push_frame(&frame(100, 100)).unwrap();
        }
        assert_eq!(session.finish().unwrap(), 10);
        assert!(out.exists());
    }
}
