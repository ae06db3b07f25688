//! Rolling video buffer with delayed, approval-gated dumps to disk.

pub mod buffer;
pub mod dump;
pub mod encoder;
pub mod feeder;
pub mod gate;
pub mod naming;

pub use buffer::{BufferError, TemporalFrameBuffer};
pub use dump::{
    dump_to_file, DelayedDumpWorkflow, DumpError, DumpOutcome, DumpRequest, PendingDump,
    ThreadedDump,
};
pub use encoder::{EncodeSession, EncoderError, FfmpegEncoder, FrameEncoder, VideoSpec};
pub use feeder::{AbsentFramePolicy, BufferFeeder, FeederError};
pub use gate::{ApprovalGate, BlockingApprovalGate};
