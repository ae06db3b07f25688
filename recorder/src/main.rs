use rewind_capture::{
    CyclicFileFrameSource, FfmpegDecoder, FrameSource, NetworkStreamConfig,
    NetworkStreamFrameSource, SourceError, StreamOptions,
};
use rewind_common::config::{Config, SourceKind, StreamConfig};
use rewind_recorder::encoder::check_ffmpeg_available;
use rewind_recorder::naming::dump_path_now;
use rewind_recorder::{
    AbsentFramePolicy, ApprovalGate, BufferFeeder, DelayedDumpWorkflow, DumpOutcome, DumpRequest,
    FfmpegEncoder, PendingDump, TemporalFrameBuffer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = config.source.location,
        kind = ?config.source.kind,
        capacity_secs = config.buffer.capacity_secs,
        fps = config.buffer.fps,
        delay_secs = config.dump.delay_secs,
        output_dir = %config.dump.output_dir.display(),
        "starting rewind"
    );

    // Both decoding and encoding shell out to ffmpeg.
    check_ffmpeg_available().await;

    if let Err(e) = tokio::fs::create_dir_all(&config.dump.output_dir).await {
        error!(error = %e, dir = %config.dump.output_dir.display(), "cannot create output directory");
        std::process::exit(1);
    }

    let source = match ActiveSource::open(&config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open frame source");
            std::process::exit(1);
        }
    };

    let buffer = match TemporalFrameBuffer::new(config.buffer.temporal_capacity(), config.buffer.fps) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!(error = %e, "invalid buffer configuration");
            source.stop();
            std::process::exit(1);
        }
    };

    let policy = if config.buffer.skip_absent {
        AbsentFramePolicy::Skip
    } else {
        AbsentFramePolicy::RepeatLast
    };
    let mut feeder = match BufferFeeder::start(Arc::clone(&buffer), source.frame_source(), policy) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "failed to start buffer feeder");
            source.stop();
            std::process::exit(1);
        }
    };

    let workflow = DelayedDumpWorkflow::new(
        Arc::clone(&buffer),
        Arc::new(FfmpegEncoder::from_config(&config.dump)),
    );

    info!("ready: mark | approve | reject | save | status | quit");
    run_command_loop(&config, &workflow, &buffer, &feeder, &source).await;

    feeder.stop();
    source.stop();
    info!("rewind stopped");
}

/// The configured source, kept concrete so `status` can report stream state.
enum ActiveSource {
    File(Arc<CyclicFileFrameSource>),
    Stream(Arc<NetworkStreamFrameSource>),
}

impl ActiveSource {
    fn open(config: &Config) -> Result<Self, SourceError> {
        let decoder = FfmpegDecoder::new();
        match config.source.kind {
            SourceKind::File => {
                let source =
                    CyclicFileFrameSource::open(&decoder, &config.source.location, config.source.fps)?;
                Ok(Self::File(Arc::new(source)))
            }
            SourceKind::Stream => {
                let stream = stream_config(&config.source.location, &config.stream);
                info!(url = stream.url, transport = stream.options.transport, "connecting to stream");
                let source = NetworkStreamFrameSource::spawn(Arc::new(decoder), stream)?;
                Ok(Self::Stream(Arc::new(source)))
            }
        }
    }

    fn frame_source(&self) -> Arc<dyn FrameSource> {
        match self {
            Self::File(s) => Arc::clone(s) as Arc<dyn FrameSource>,
            Self::Stream(s) => Arc::clone(s) as Arc<dyn FrameSource>,
        }
    }

    fn stop(&self) {
        self.frame_source().stop();
    }
}

fn stream_config(url: &str, stream: &StreamConfig) -> NetworkStreamConfig {
    NetworkStreamConfig {
        options: StreamOptions {
            transport: stream.transport.clone(),
            io_timeout: stream.io_timeout(),
            probe_size: stream.probe_size,
            analyze_duration: Duration::from_micros(stream.analyze_duration_us),
            max_delay: Duration::from_micros(stream.max_delay_us),
            low_latency: true,
        },
        reconnect_base_delay: stream.reconnect_base_delay(),
        reconnect_cap: stream.reconnect_cap(),
        read_timeout: stream.read_timeout(),
        ..NetworkStreamConfig::new(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Schedule a dump that writes only if approved before it fires.
    Mark,
    Approve,
    Reject,
    /// Schedule a dump that is approved up front.
    Save,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "mark" | "m" => Some(Command::Mark),
        "approve" | "a" => Some(Command::Approve),
        "reject" | "r" => Some(Command::Reject),
        "save" | "s" => Some(Command::Save),
        "status" => Some(Command::Status),
        "quit" | "q" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

async fn run_command_loop(
    config: &Config,
    workflow: &DelayedDumpWorkflow,
    buffer: &TemporalFrameBuffer,
    feeder: &BufferFeeder,
    source: &ActiveSource,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    // Gate of the most recent `mark`; approve/reject act on it.
    let mut last_gate: Option<ApprovalGate> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return;
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed; waiting for Ctrl-C");
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read stdin; waiting for Ctrl-C");
                        stdin_open = false;
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let Some(command) = parse_command(&line) else {
                    warn!(input = line.trim(), "unknown command");
                    continue;
                };
                match command {
                    Command::Mark => {
                        let pending = workflow.schedule(dump_request(config), ApprovalGate::new());
                        last_gate = Some(pending.gate().clone());
                        report_when_done(pending);
                    }
                    Command::Approve | Command::Reject => match &last_gate {
                        Some(gate) if command == Command::Approve => {
                            gate.approve().await;
                            info!("pending dump approved");
                        }
                        Some(gate) => {
                            gate.reject().await;
                            info!("pending dump rejected");
                        }
                        None => warn!("no pending dump; use mark first"),
                    },
                    Command::Save => {
                        let pending = workflow.schedule_approved(dump_request(config)).await;
                        report_when_done(pending);
                    }
                    Command::Status => log_status(buffer, feeder, source),
                    Command::Quit => return,
                }
            }
        }
    }
}

fn dump_request(config: &Config) -> DumpRequest {
    DumpRequest::new(dump_path_now(&config.dump.output_dir), config.dump.delay())
        .overwrite_allowed(config.dump.overwrite_allowed)
}

fn report_when_done(pending: PendingDump) {
    let destination = pending.destination().display().to_string();
    info!(path = destination, "dump scheduled");
    tokio::spawn(async move {
        match pending.outcome().await {
            Ok(DumpOutcome::Written { frames, .. }) => {
                info!(path = destination, frames, "dump written");
            }
            Ok(DumpOutcome::Skipped) => info!(path = destination, "dump skipped"),
            Err(e) => error!(path = destination, error = %e, "dump failed"),
        }
    });
}

fn log_status(buffer: &TemporalFrameBuffer, feeder: &BufferFeeder, source: &ActiveSource) {
    let frames = buffer.len();
    let capacity = buffer.capacity();
    let appended = feeder.frames_appended();
    match source {
        ActiveSource::File(_) => info!(frames, capacity, appended, "status: looping file"),
        ActiveSource::Stream(s) => info!(
            frames,
            capacity,
            appended,
            state = ?s.state(),
            reconnect_attempts = s.reconnect_attempts(),
            "status: network stream"
        ),
    }
}
