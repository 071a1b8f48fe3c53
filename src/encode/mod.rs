//! Streaming encoders for formats that cannot be produced by merging PCM segments

use anyhow::Result;
use std::path::Path;

use crate::audio::SampleEncoding;

pub mod ffmpeg;
pub mod queue;

pub use ffmpeg::FfmpegMp3Backend;
pub use queue::{EncodeQueue, EncodeSummary, FinishCallback, QueueHandle};

/// Input format and target quality for an encoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
    /// Target bitrate in kbit/s
    pub bitrate_kbps: u32,
}

/// An open encoder writing one continuous output file
pub trait StreamEncoder: Send {
    /// Feed interleaved PCM bytes
    fn encode(&mut self, pcm: &[u8]) -> Result<()>;

    /// Flush and close the output; called exactly once
    fn finish(&mut self) -> Result<()>;
}

/// Creates an encoder per recording
pub trait EncoderBackend: Send + Sync {
    fn create(&self, output: &Path, config: &EncoderConfig) -> Result<Box<dyn StreamEncoder>>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
