pub mod audio;
pub mod config;
pub mod encode;
pub mod error;
pub mod session;

pub use audio::{
    CaptureBackend, CaptureConfig, CaptureStream, FrameBuffer, LevelMeter, SampleEncoding,
    SpectrumLevelMeter, WavFileBackend,
};
pub use config::Config;
pub use encode::{EncodeQueue, EncodeSummary, EncoderBackend, EncoderConfig, FfmpegMp3Backend, StreamEncoder};
pub use error::RecordError;
pub use session::{
    Command, OutputFormat, PeakScope, RecordConfig, RecordSession, RecordSessionBuilder,
    SessionState, SessionStats,
};
