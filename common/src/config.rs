use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest rolling window accepted from configuration (one day).
pub const MAX_CAPACITY_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub dump: DumpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Finite media file, looped forever.
    File,
    /// Live network stream (RTSP and friends), reconnected on failure.
    Stream,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// File path or stream URL, depending on `kind`.
    pub location: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_capacity_secs")]
    pub capacity_secs: f64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// When false, the feeder repeats the last frame instead of skipping a
    /// tick on which the source had nothing.
    #[serde(default = "default_skip_absent")]
    pub skip_absent: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_cap_secs")]
    pub reconnect_cap_secs: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_probe_size")]
    pub probe_size: u32,
    #[serde(default = "default_analyze_duration_us")]
    pub analyze_duration_us: u64,
    #[serde(default = "default_max_delay_us")]
    pub max_delay_us: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DumpConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    #[serde(default)]
    pub overwrite_allowed: bool,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity_secs: default_capacity_secs(),
            fps: default_fps(),
            skip_absent: default_skip_absent(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_cap_secs: default_reconnect_cap_secs(),
            read_timeout_ms: default_read_timeout_ms(),
            io_timeout_secs: default_io_timeout_secs(),
            transport: default_transport(),
            probe_size: default_probe_size(),
            analyze_duration_us: default_analyze_duration_us(),
            max_delay_us: default_max_delay_us(),
        }
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            delay_secs: default_delay_secs(),
            overwrite_allowed: false,
            codec: default_codec(),
            crf: default_crf(),
            preset: default_preset(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the buffer or the pacing loop meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.fps == 0 {
            return Err(ConfigError::Invalid("source.fps must be at least 1".into()));
        }
        if self.buffer.fps == 0 {
            return Err(ConfigError::Invalid("buffer.fps must be at least 1".into()));
        }
        let capacity = self.buffer.capacity_secs;
        if !capacity.is_finite() || !(1.0..=MAX_CAPACITY_SECS).contains(&capacity) {
            return Err(ConfigError::Invalid(format!(
                "buffer.capacity_secs must be between 1 and {MAX_CAPACITY_SECS}, got {capacity}"
            )));
        }
        if self.stream.reconnect_cap_secs == 0 {
            return Err(ConfigError::Invalid(
                "stream.reconnect_cap_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl BufferConfig {
    /// Zero when `capacity_secs` is not representable, which the buffer
    /// rejects as an invalid configuration.
    pub fn temporal_capacity(&self) -> Duration {
        Duration::try_from_secs_f64(self.capacity_secs).unwrap_or(Duration::ZERO)
    }
}

impl StreamConfig {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_secs(self.reconnect_cap_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

impl DumpConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_fps() -> u32 {
    20
}
fn default_capacity_secs() -> f64 {
    30.0
}
fn default_skip_absent() -> bool {
    true
}
fn default_reconnect_base_delay_ms() -> u64 {
    5_000
}
fn default_reconnect_cap_secs() -> u64 {
    30
}
fn default_read_timeout_ms() -> u64 {
    1_000
}
fn default_io_timeout_secs() -> u64 {
    5
}
fn default_transport() -> String {
    "tcp".into()
}
fn default_probe_size() -> u32 {
    4096
}
fn default_analyze_duration_us() -> u64 {
    1_000_000
}
fn default_max_delay_us() -> u64 {
    500_000
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("recordings")
}
fn default_delay_secs() -> u64 {
    10
}
fn default_codec() -> String {
    "h264".into()
}
fn default_crf() -> u32 {
    23
}
fn default_preset() -> String {
    "veryfast".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::parse(
            r#"
            [source]
            kind = "stream"
            location = "rtsp://192.168.1.20:554/live"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.kind, SourceKind::Stream);
        assert_eq!(config.source.fps, 20);
        assert_eq!(config.buffer.temporal_capacity(), Duration::from_secs(30));
        assert!(config.buffer.skip_absent);
        assert_eq!(config.stream.reconnect_base_delay(), Duration::from_secs(5));
        assert_eq!(config.stream.reconnect_cap(), Duration::from_secs(30));
        assert_eq!(config.stream.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.stream.transport, "tcp");
        assert!(!config.dump.overwrite_allowed);
        assert_eq!(config.dump.output_dir, PathBuf::from("recordings"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::parse(
            r#"
            [source]
            kind = "file"
            location = "clips/loop.mp4"
            fps = 25

            [buffer]
            capacity_secs = 12.5
            fps = 25
            skip_absent = false

            [dump]
            delay_secs = 3
            overwrite_allowed = true
            codec = "h265"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.kind, SourceKind::File);
        assert_eq!(config.buffer.fps, 25);
        assert_eq!(config.buffer.temporal_capacity(), Duration::from_millis(12_500));
        assert!(!config.buffer.skip_absent);
        assert_eq!(config.dump.delay(), Duration::from_secs(3));
        assert!(config.dump.overwrite_allowed);
        assert_eq!(config.dump.codec, "h265");
    }

    #[test]
    fn zero_fps_is_rejected() {
        let result = Config::parse(
            r#"
            [source]
            kind = "file"
            location = "a.mp4"

            [buffer]
            fps = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn sub_second_capacity_is_rejected() {
        let result = Config::parse(
            r#"
            [source]
            kind = "file"
            location = "a.mp4"

            [buffer]
            capacity_secs = 0.5
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unbounded_capacity_is_rejected() {
        for capacity in ["inf", "nan", "1e300", "86401.0"] {
            let result = Config::parse(&format!(
                "[source]\nkind = \"file\"\nlocation = \"a.mp4\"\n\n[buffer]\ncapacity_secs = {capacity}\n"
            ));
            assert!(
                matches!(result, Err(ConfigError::Invalid(_))),
                "capacity_secs = {capacity} should be invalid"
            );
        }
    }

    #[test]
    fn unrepresentable_capacity_maps_to_zero_duration() {
        let buffer = BufferConfig {
            capacity_secs: f64::INFINITY,
            ..BufferConfig::default()
        };
        assert_eq!(buffer.temporal_capacity(), Duration::ZERO);
    }

    #[test]
    fn unknown_source_kind_fails_to_parse() {
        let result = Config::parse(
            r#"
            [source]
            kind = "webcam"
            location = "/dev/video0"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
