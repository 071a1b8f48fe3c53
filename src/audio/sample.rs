use serde::{Deserialize, Serialize};

/// PCM sample layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// Unsigned 8-bit, midpoint 128
    Pcm8,
    /// Signed 16-bit little-endian
    #[default]
    Pcm16,
}

impl SampleEncoding {
    pub const fn bits_per_sample(&self) -> u16 {
        match self {
            Self::Pcm8 => 8,
            Self::Pcm16 => 16,
        }
    }

    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Pcm8 => 1,
            Self::Pcm16 => 2,
        }
    }

    /// Largest positive amplitude a sample can carry
    pub const fn full_scale(&self) -> u16 {
        match self {
            Self::Pcm8 => i8::MAX as u16,
            Self::Pcm16 => i16::MAX as u16,
        }
    }

    /// Highest absolute sample value in `bytes`
    ///
    /// A trailing partial sample is ignored.
    pub fn peak(&self, bytes: &[u8]) -> u16 {
        match self {
            Self::Pcm8 => bytes
                .iter()
                .map(|&b| (b as i16 - 128).unsigned_abs())
                .max()
                .unwrap_or(0),
            Self::Pcm16 => bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]).unsigned_abs())
                .max()
                .unwrap_or(0),
        }
    }

    /// Multiply every whole sample in `bytes` by `gain`, in place.
    ///
    /// The float product is truncated and wrapped to the sample width, so values
    /// that do not fit wrap around instead of clipping.
    pub fn apply_gain(&self, bytes: &mut [u8], gain: f32) {
        match self {
            Self::Pcm8 => {
                for b in bytes.iter_mut() {
                    let centered = *b as i16 - 128;
                    let scaled = scale(centered, gain) as i8;
                    *b = (scaled as u8).wrapping_add(128);
                }
            }
            Self::Pcm16 => {
                for pair in bytes.chunks_exact_mut(2) {
                    let sample = i16::from_le_bytes([pair[0], pair[1]]);
                    let scaled = scale(sample, gain) as i16;
                    pair.copy_from_slice(&scaled.to_le_bytes());
                }
            }
        }
    }
}

// f32 -> i32 saturates, the caller's narrowing cast wraps
fn scale(sample: i16, gain: f32) -> i32 {
    (sample as f32 * gain) as i32
}
