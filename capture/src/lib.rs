//! Frame sources for the rewind buffer.
//!
//! Each source owns one acquisition thread that decodes frames on its own
//! schedule and caches the most recent one. Consumers pull through the
//! [`FrameSource`] trait and never touch the decoder directly:
//! - [`CyclicFileFrameSource`] loops a finite media file forever
//! - [`NetworkStreamFrameSource`] follows a live stream and reconnects with
//!   a bounded linear backoff
//!
//! Decoding itself is delegated to a [`MediaDecoder`]; [`FfmpegDecoder`]
//! drives the `ffmpeg`/`ffprobe` tools.

mod backoff;
pub mod cyclic;
pub mod decoder;
pub mod ffmpeg;
pub mod network;
mod signal;
mod slot;
mod source;
#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use cyclic::CyclicFileFrameSource;
pub use decoder::{DecodeError, DecodeSession, Interrupter, MediaDecoder, MediaLocator, StreamOptions};
pub use ffmpeg::FfmpegDecoder;
pub use network::{NetworkStreamConfig, NetworkStreamFrameSource, StreamState};
pub use signal::Shutdown;
pub use source::{FrameSource, SourceError};
