use std::path::Path;
use tracing::{info, warn};

use super::config::{OutputFormat, RecordConfig};
use crate::audio::{gain_factor, merge_segments, prepend_wav_header, RawSegment, SampleEncoding, Segment};
use crate::error::RecordError;

/// A closed capture segment waiting for the final file
#[derive(Debug)]
pub(crate) enum PendingSegment {
    /// Already rescaled with its own gain
    Ready(Segment),
    /// Raw pass only; rescaled at stop with the recording-wide gain
    Unscaled(RawSegment),
}

impl PendingSegment {
    fn location(&self) -> &Path {
        match self {
            PendingSegment::Ready(segment) => segment.path(),
            PendingSegment::Unscaled(raw) => raw.raw_path(),
        }
    }
}

/// How the final file is produced, chosen once per recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Finalizer {
    /// Merge segments, no header
    Pcm,
    /// Merge segments, then prepend a RIFF/WAVE header
    Wav {
        sample_rate: u32,
        channels: u16,
        bits_per_sample: u16,
    },
    /// The encoder already writes the output; drain and close it
    Mp3,
}

impl Finalizer {
    pub fn for_config(config: &RecordConfig) -> Self {
        match config.format {
            OutputFormat::Pcm => Finalizer::Pcm,
            OutputFormat::Wav => Finalizer::Wav {
                sample_rate: config.sample_rate,
                channels: config.channels,
                bits_per_sample: config.encoding.bits_per_sample(),
            },
            OutputFormat::Mp3 => Finalizer::Mp3,
        }
    }

    pub fn uses_encoder(&self) -> bool {
        matches!(self, Finalizer::Mp3)
    }

    /// Build the output file from local segments.
    ///
    /// Blocking. On a merge failure every segment file is left on disk.
    pub(crate) fn make_file(
        &self,
        pending: Vec<PendingSegment>,
        output: &Path,
        max_gain: f32,
        encoding: SampleEncoding,
    ) -> Result<u64, RecordError> {
        if self.uses_encoder() {
            return Ok(0);
        }

        let mut segments = rescale_pending(pending, max_gain, encoding)?;
        let payload = merge_segments(&mut segments, output).map_err(RecordError::Merge)?;

        if let Finalizer::Wav {
            sample_rate,
            channels,
            bits_per_sample,
        } = *self
        {
            prepend_wav_header(output, sample_rate, channels, bits_per_sample)
                .map_err(RecordError::Container)?;
        }

        info!("Recording written: {} ({} payload bytes)", output.display(), payload);
        Ok(payload)
    }
}

/// Apply one gain derived from the loudest unscaled segment to all of them
fn rescale_pending(
    pending: Vec<PendingSegment>,
    max_gain: f32,
    encoding: SampleEncoding,
) -> Result<Vec<Segment>, RecordError> {
    let peak = pending
        .iter()
        .filter_map(|p| match p {
            PendingSegment::Unscaled(raw) => Some(raw.peak()),
            PendingSegment::Ready(_) => None,
        })
        .max();

    let gain = peak.map(|peak| gain_factor(peak, max_gain, encoding));
    if let (Some(peak), Some(gain)) = (peak, gain) {
        info!("Recording peak {} gives gain {:.3}", peak, gain);
    }

    let mut segments = Vec::with_capacity(pending.len());
    for item in pending {
        match item {
            PendingSegment::Ready(segment) => segments.push(segment),
            PendingSegment::Unscaled(raw) => {
                let gain = gain.unwrap_or(1.0);
                segments.push(raw.rescale(gain).map_err(RecordError::Normalize)?);
            }
        }
    }

    Ok(segments)
}

/// Log the files a failed recording leaves behind
pub(crate) fn abandon(pending: &[PendingSegment]) {
    for item in pending {
        warn!("Abandoned segment left on disk: {}", item.location().display());
    }
}
