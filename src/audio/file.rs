use anyhow::{bail, Context, Result};
use hound::{WavIntoSamples, WavReader};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use super::backend::{CaptureBackend, CaptureConfig, CaptureStream};
use super::sample::SampleEncoding;

/// Capture backend that plays a WAV file as if it were a live input.
///
/// The read position survives pause/resume: every cycle continues where the
/// previous one stopped.
pub struct WavFileBackend {
    path: PathBuf,
    realtime: bool,
    name: String,
    /// Samples consumed by previous cycles
    position: Arc<AtomicU64>,
}

impl WavFileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("wav-file:{}", path.display()),
            path,
            realtime: false,
            position: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Deliver frames no faster than real time
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Samples delivered so far across all cycles
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for WavFileBackend {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureStream>> {
        let mut reader = WavReader::open(&self.path)
            .with_context(|| format!("Failed to open WAV file: {:?}", self.path))?;
        let spec = reader.spec();

        if spec.sample_format != hound::SampleFormat::Int
            || spec.bits_per_sample != config.encoding.bits_per_sample()
        {
            bail!(
                "{:?} holds {}-bit {:?} samples, expected {}-bit integer PCM",
                self.path,
                spec.bits_per_sample,
                spec.sample_format,
                config.encoding.bits_per_sample()
            );
        }
        if spec.sample_rate != config.sample_rate || spec.channels != config.channels {
            bail!(
                "{:?} is {}Hz/{}ch, expected {}Hz/{}ch",
                self.path,
                spec.sample_rate,
                spec.channels,
                config.sample_rate,
                config.channels
            );
        }

        let consumed = self.position.load(Ordering::SeqCst);
        let frame_index = (consumed / spec.channels as u64) as u32;
        reader
            .seek(frame_index)
            .with_context(|| format!("Failed to seek {:?} to frame {}", self.path, frame_index))?;

        info!(
            "WAV capture opened: {} at frame {} ({}Hz, {} channels)",
            self.path.display(),
            frame_index,
            spec.sample_rate,
            spec.channels
        );

        Ok(Box::new(WavFileStream {
            samples: reader.into_samples::<i32>(),
            encoding: config.encoding,
            byte_rate: config.byte_rate(),
            realtime: self.realtime,
            started: Instant::now(),
            bytes_delivered: 0,
            consumed: frame_index as u64 * spec.channels as u64,
            position: Arc::clone(&self.position),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct WavFileStream {
    samples: WavIntoSamples<BufReader<File>, i32>,
    encoding: SampleEncoding,
    byte_rate: usize,
    realtime: bool,
    started: Instant,
    bytes_delivered: u64,
    consumed: u64,
    position: Arc<AtomicU64>,
}

impl CaptureStream for WavFileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let sample_bytes = self.encoding.bytes_per_sample();
        let mut filled = 0;

        while filled + sample_bytes <= buf.len() {
            let sample = match self.samples.next() {
                Some(sample) => sample.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
                None => break,
            };

            match self.encoding {
                SampleEncoding::Pcm8 => buf[filled] = (sample + 128) as u8,
                SampleEncoding::Pcm16 => {
                    buf[filled..filled + 2].copy_from_slice(&(sample as i16).to_le_bytes())
                }
            }
            filled += sample_bytes;
            self.consumed += 1;
        }

        if self.realtime && filled > 0 && self.byte_rate > 0 {
            self.bytes_delivered += filled as u64;
            let due = Duration::from_secs_f64(self.bytes_delivered as f64 / self.byte_rate as f64);
            if let Some(wait) = due.checked_sub(self.started.elapsed()) {
                std::thread::sleep(wait);
            }
        }

        Ok(filled)
    }

    fn close(&mut self) {
        self.position.store(self.consumed, Ordering::SeqCst);
    }
}
