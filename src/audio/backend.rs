use anyhow::Result;
use std::io;

use super::sample::SampleEncoding;

/// One capture read: interleaved PCM bytes
pub type FrameBuffer = Vec<u8>;

/// Capture parameters handed to a backend when a capture cycle opens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Sample layout
    pub encoding: SampleEncoding,
    /// Bytes per capture read
    pub frame_bytes: usize,
}

impl CaptureConfig {
    /// Bytes per second of audio at this configuration
    pub fn byte_rate(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * self.encoding.bytes_per_sample()
    }
}

/// Audio capture backend
///
/// A stream is opened per capture cycle (start or resume) and dropped when the
/// cycle ends.
pub trait CaptureBackend: Send + Sync {
    /// Open a stream that delivers frames in the given format
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureStream>>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Blocking frame source for one capture cycle
pub trait CaptureStream: Send {
    /// Fill `buf` with the next frame.
    ///
    /// Returns the number of bytes read; `Ok(0)` means the input is exhausted.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the device; called once when the cycle ends
    fn close(&mut self) {}
}
