use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::audio::{CaptureConfig, SampleEncoding};
use crate::encode::EncoderConfig;

/// Final file encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Headerless PCM
    Pcm,
    /// PCM behind a canonical 44-byte RIFF/WAVE header
    #[default]
    Wav,
    /// Streamed through an MP3 encoder
    Mp3,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Pcm => "pcm",
            OutputFormat::Wav => "wav",
            OutputFormat::Mp3 => "mp3",
        };
        f.write_str(name)
    }
}

/// Which frames the normalization gain is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakScope {
    /// One gain for the whole recording, applied at stop
    #[default]
    Session,
    /// Each segment is rescaled with its own gain when it closes
    Segment,
}

/// Configuration for one recording
///
/// Handed to the session with the start command and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of interleaved channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Sample layout (8-bit unsigned or 16-bit signed little-endian)
    pub encoding: SampleEncoding,

    pub format: OutputFormat,

    /// Where the finished recording is written
    pub output_path: PathBuf,

    /// Upper bound for the normalization gain, at least 1.0
    pub max_gain: f32,

    /// Segment directory; `None` uses the default under the OS temp dir
    pub temp_dir: Option<PathBuf>,

    pub peak_scope: PeakScope,

    /// Audio per capture read, in milliseconds
    pub frame_duration_ms: u32,

    /// Bounded MP3 queue length in frames; `None` never blocks the capture thread
    pub encode_queue_capacity: Option<usize>,

    pub mp3_bitrate_kbps: u32,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            encoding: SampleEncoding::Pcm16,
            format: OutputFormat::Wav,
            output_path: PathBuf::from("recording.wav"),
            max_gain: 1.0,
            temp_dir: None,
            peak_scope: PeakScope::Session,
            frame_duration_ms: 100,
            encode_queue_capacity: None,
            mp3_bitrate_kbps: 128,
        }
    }
}

/// Largest capture read a config may ask for
const MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

impl RecordConfig {
    /// Check the values a recording cannot start with
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample_rate must be positive".to_string());
        }
        if self.channels == 0 {
            return Err("channels must be positive".to_string());
        }
        if !self.max_gain.is_finite() || self.max_gain < 1.0 {
            return Err(format!("max_gain must be >= 1.0, got {}", self.max_gain));
        }
        if self.frame_duration_ms == 0 {
            return Err("frame_duration_ms must be positive".to_string());
        }
        let block = self.channels as u64 * self.encoding.bytes_per_sample() as u64;
        if block > u16::MAX as u64 {
            return Err(format!("{} channels do not fit a WAV block", self.channels));
        }
        if self.sample_rate as u64 * block > u32::MAX as u64 {
            return Err(format!(
                "byte rate of {} Hz x {} channels is too large",
                self.sample_rate, self.channels
            ));
        }
        let frame = self.sample_rate as u64 * self.frame_duration_ms as u64 / 1000 * block;
        if frame > MAX_FRAME_BYTES {
            return Err(format!(
                "a {} ms frame needs {} bytes, limit is {}",
                self.frame_duration_ms, frame, MAX_FRAME_BYTES
            ));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err("output_path is empty".to_string());
        }
        if self.output_path.is_dir() {
            return Err(format!("output_path {:?} is a directory", self.output_path));
        }
        if self.encode_queue_capacity == Some(0) {
            return Err("encode_queue_capacity must be positive when set".to_string());
        }
        if self.format == OutputFormat::Mp3 && self.mp3_bitrate_kbps == 0 {
            return Err("mp3_bitrate_kbps must be positive".to_string());
        }
        Ok(())
    }

    /// Bytes per capture read, rounded down to whole sample frames
    pub fn frame_bytes(&self) -> usize {
        let block = self.channels as usize * self.encoding.bytes_per_sample();
        let samples = self.sample_rate as usize * self.frame_duration_ms as usize / 1000;
        (samples * block).max(block)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            encoding: self.encoding,
            frame_bytes: self.frame_bytes(),
        }
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            encoding: self.encoding,
            bitrate_kbps: self.mp3_bitrate_kbps,
        }
    }
}
