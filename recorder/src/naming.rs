use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// File name for a dump triggered at `triggered_at`, millisecond precision,
/// e.g. "rewind_20261019T093000000Z.mp4". Names sort chronologically.
pub fn dump_file_name(triggered_at: DateTime<Utc>) -> String {
    format!("rewind_{}.mp4", triggered_at.format("%Y%m%dT%H%M%S%3fZ"))
}

/// Destination for a dump triggered now, inside `dir`.
pub fn dump_path_now(dir: &Path) -> PathBuf {
    dir.join(dump_file_name(Utc::now()))
}
