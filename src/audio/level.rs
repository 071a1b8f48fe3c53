//! Level meter collaborator
//!
//! Turns a raw frame into a coarse magnitude spectrum and derives a decibel
//! estimate from it. Only used to feed the level and spectral listeners.

use std::f32::consts::PI;

use super::sample::SampleEncoding;

/// Reported when the estimate is undefined or negative
pub const LEVEL_FLOOR_DB: i32 = 27;

/// Spectrum analysis for the live level listeners
pub trait LevelMeter: Send + Sync {
    /// Magnitude bins for `frame`, or `None` if the frame is too short
    fn spectrum(&self, frame: &[u8], encoding: SampleEncoding) -> Option<Vec<u8>>;

    /// Decibel estimate derived from `spectrum`
    fn decibels(&self, spectrum: &[u8]) -> i32;
}

/// Naive DFT over the first window of each frame
#[derive(Debug, Clone)]
pub struct SpectrumLevelMeter {
    window: usize,
}

impl SpectrumLevelMeter {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
        }
    }
}

impl Default for SpectrumLevelMeter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LevelMeter for SpectrumLevelMeter {
    fn spectrum(&self, frame: &[u8], encoding: SampleEncoding) -> Option<Vec<u8>> {
        let full_scale = encoding.full_scale() as f32;
        let samples: Vec<f32> = match encoding {
            SampleEncoding::Pcm8 => frame
                .iter()
                .take(self.window)
                .map(|&b| (b as f32 - 128.0) / full_scale)
                .collect(),
            SampleEncoding::Pcm16 => frame
                .chunks_exact(2)
                .take(self.window)
                .map(|p| i16::from_le_bytes([p[0], p[1]]) as f32 / full_scale)
                .collect(),
        };

        let n = samples.len();
        if n < 2 {
            return None;
        }

        let bins = (0..n / 2)
            .map(|k| {
                let (mut re, mut im) = (0.0f32, 0.0f32);
                for (t, &x) in samples.iter().enumerate() {
                    let angle = 2.0 * PI * k as f32 * t as f32 / n as f32;
                    re += x * angle.cos();
                    im -= x * angle.sin();
                }
                let magnitude = (re * re + im * im).sqrt() * 2.0 / n as f32;
                (magnitude * 127.0).clamp(0.0, 127.0) as u8
            })
            .collect();

        Some(bins)
    }

    fn decibels(&self, spectrum: &[u8]) -> i32 {
        const SKIP_BINS: usize = 8;
        const MAX_BINS: usize = 128;

        let len = spectrum.len().min(MAX_BINS);
        if len <= SKIP_BINS {
            return LEVEL_FLOOR_DB;
        }

        let sum: f64 = spectrum[SKIP_BINS..len].iter().map(|&b| b as f64).sum();
        let average = sum / (len - SKIP_BINS) as f64 * 65536.0 / 128.0;
        let db = 20.0 * average.log10();

        if !db.is_finite() || db < 0.0 {
            LEVEL_FLOOR_DB
        } else {
            db as i32
        }
    }
}
