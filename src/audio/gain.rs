//! Two-pass gain normalization
//!
//! Frames are appended unscaled to a private `.raw` store while the peak is tracked.
//! Only once the last frame has been written is the gain known, at which point the
//! store is streamed back through [`RawSegment::rescale`] into the segment file.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::sample::SampleEncoding;
use super::segment::Segment;

/// Bytes read back per rescale step
const RESCALE_CHUNK_BYTES: usize = 4096;

/// Gain that brings `peak` up to full scale, capped at `max_gain`
///
/// A zero peak counts as 1, so silence always gets `max_gain`.
pub fn gain_factor(peak: u16, max_gain: f32, encoding: SampleEncoding) -> f32 {
    let allowed = encoding.full_scale() as f32 / peak.max(1) as f32;
    allowed.min(max_gain)
}

/// Writer for the raw pass of one segment
pub struct GainNormalizer {
    writer: Option<BufWriter<File>>,
    raw_path: PathBuf,
    output_path: PathBuf,
    encoding: SampleEncoding,
    max_gain: f32,
    peak: u16,
    bytes_written: u64,
    /// Leading bytes of a sample split across two frames
    partial: Vec<u8>,
}

impl GainNormalizer {
    /// Open the raw store next to `output_path`
    pub fn create(
        output_path: impl Into<PathBuf>,
        max_gain: f32,
        encoding: SampleEncoding,
    ) -> Result<Self> {
        let output_path = output_path.into();
        let raw_path = raw_path_for(&output_path);

        let file = File::create(&raw_path)
            .with_context(|| format!("Failed to create raw store: {:?}", raw_path))?;

        debug!(
            "Gain normalizer opened: raw={:?}, output={:?}, max_gain={}",
            raw_path, output_path, max_gain
        );

        Ok(Self {
            writer: Some(BufWriter::new(file)),
            raw_path,
            output_path,
            encoding,
            max_gain,
            peak: 0,
            bytes_written: 0,
            partial: Vec::new(),
        })
    }

    /// Track the frame's peak and append it unscaled
    ///
    /// Frames need not end on a sample boundary; a split sample is joined with
    /// the head of the next frame before it is scanned.
    pub fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.track_peak(frame);

        if let Some(writer) = &mut self.writer {
            writer
                .write_all(frame)
                .with_context(|| format!("Failed to write raw store: {:?}", self.raw_path))?;
            self.bytes_written += frame.len() as u64;
        }

        Ok(())
    }

    fn track_peak(&mut self, frame: &[u8]) {
        let sample_bytes = self.encoding.bytes_per_sample();
        let mut rest = frame;

        if !self.partial.is_empty() {
            let needed = (sample_bytes - self.partial.len()).min(rest.len());
            self.partial.extend_from_slice(&rest[..needed]);
            rest = &rest[needed..];
            if self.partial.len() < sample_bytes {
                return;
            }
            self.peak = self.peak.max(self.encoding.peak(&self.partial));
            self.partial.clear();
        }

        let whole = rest.len() - rest.len() % sample_bytes;
        self.peak = self.peak.max(self.encoding.peak(&rest[..whole]));
        self.partial.extend_from_slice(&rest[whole..]);
    }

    /// Highest absolute sample seen so far
    pub fn peak(&self) -> u16 {
        self.peak
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// End the raw pass without rescaling
    pub fn into_raw(mut self) -> Result<RawSegment> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("Failed to flush raw store: {:?}", self.raw_path))?;
        }

        Ok(RawSegment {
            raw_path: self.raw_path.clone(),
            output_path: self.output_path.clone(),
            encoding: self.encoding,
            max_gain: self.max_gain,
            peak: self.peak,
            len: self.bytes_written,
        })
    }

    /// End the raw pass and rescale with this segment's own gain
    pub fn finish(self) -> Result<Segment> {
        let raw = self.into_raw()?;
        let gain = raw.gain();
        raw.rescale(gain)
    }
}

impl Drop for GainNormalizer {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush raw store on drop: {}", e);
            }
        }
    }
}

/// A segment whose raw pass is complete but which has not been rescaled yet
#[derive(Debug)]
pub struct RawSegment {
    raw_path: PathBuf,
    output_path: PathBuf,
    encoding: SampleEncoding,
    max_gain: f32,
    peak: u16,
    len: u64,
}

impl RawSegment {
    pub fn peak(&self) -> u16 {
        self.peak
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn raw_path(&self) -> &Path {
        &self.raw_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Gain derived from this segment's peak alone
    pub fn gain(&self) -> f32 {
        gain_factor(self.peak, self.max_gain, self.encoding)
    }

    /// Stream the raw store into the segment file with `gain` applied, then delete it.
    ///
    /// On failure the partially written segment file and the raw store are left
    /// on disk.
    pub fn rescale(self, gain: f32) -> Result<Segment> {
        let mut reader = File::open(&self.raw_path)
            .with_context(|| format!("Failed to open raw store: {:?}", self.raw_path))?;
        let file = File::create(&self.output_path)
            .with_context(|| format!("Failed to create segment file: {:?}", self.output_path))?;
        let mut writer = BufWriter::new(file);

        let sample_bytes = self.encoding.bytes_per_sample();
        let mut buf = vec![0u8; RESCALE_CHUNK_BYTES];
        let mut filled = 0;
        let mut total = 0u64;

        loop {
            let n = reader
                .read(&mut buf[filled..])
                .with_context(|| format!("Failed to read raw store: {:?}", self.raw_path))?;
            if n == 0 {
                break;
            }
            filled += n;

            // Keep a split sample for the next read
            let whole = filled - filled % sample_bytes;
            self.encoding.apply_gain(&mut buf[..whole], gain);
            writer
                .write_all(&buf[..whole])
                .with_context(|| format!("Failed to write segment: {:?}", self.output_path))?;
            total += whole as u64;

            buf.copy_within(whole..filled, 0);
            filled -= whole;
        }

        if filled > 0 {
            writer
                .write_all(&buf[..filled])
                .with_context(|| format!("Failed to write segment: {:?}", self.output_path))?;
            total += filled as u64;
        }

        writer
            .flush()
            .with_context(|| format!("Failed to flush segment: {:?}", self.output_path))?;
        drop(reader);

        fs::remove_file(&self.raw_path)
            .with_context(|| format!("Failed to remove raw store: {:?}", self.raw_path))?;

        info!(
            "Segment rescaled: {:?} ({} bytes, peak={}, gain={:.3})",
            self.output_path, total, self.peak, gain
        );

        Ok(Segment::new(self.output_path, total))
    }
}

fn raw_path_for(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".raw");
    output_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pcm16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect()
    }

    #[test]
    fn test_gain_factor_capped_by_max_gain() {
        let gain = gain_factor(20000, 2.0, SampleEncoding::Pcm16);
        assert!((gain - 32767.0 / 20000.0).abs() < 1e-6);
        assert!((gain - 1.638).abs() < 0.001);

        assert_eq!(gain_factor(1000, 2.0, SampleEncoding::Pcm16), 2.0);
    }

    #[test]
    fn test_peak_survives_frames_split_mid_sample() -> Result<()> {
        let dir = TempDir::new()?;
        let output = dir.path().join("split.pcm");
        let bytes = pcm16(&[100, 20000, -300]);

        let mut normalizer = GainNormalizer::create(&output, 2.0, SampleEncoding::Pcm16)?;
        normalizer.write(&bytes[..1])?;
        normalizer.write(&bytes[1..4])?;
        normalizer.write(&bytes[4..])?;
        assert_eq!(normalizer.peak(), 20000);

        let segment = normalizer.finish()?;
        assert_eq!(segment.len(), bytes.len() as u64);

        let gain = 32767.0f32 / 20000.0;
        let expected: Vec<i16> = [100i16, 20000, -300]
            .iter()
            .map(|&s| (s as f32 * gain) as i32 as i16)
            .collect();
        assert_eq!(samples(&fs::read(&output)?), expected);
        Ok(())
    }

    #[test]
    fn test_gain_factor_silence_uses_max_gain() {
        assert_eq!(gain_factor(0, 3.5, SampleEncoding::Pcm16), 3.5);
    }

    #[test]
    fn test_gain_factor_full_scale_peak_is_below_one() {
        let gain = gain_factor(32768, 4.0, SampleEncoding::Pcm16);
        assert!(gain < 1.0);
    }

    #[test]
    fn test_normalizer_scales_whole_segment() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("seg.pcm");

        let mut normalizer = GainNormalizer::create(&out, 2.0, SampleEncoding::Pcm16)?;
        normalizer.write(&pcm16(&[100, -200]))?;
        normalizer.write(&pcm16(&[20000, 50]))?;
        assert_eq!(normalizer.peak(), 20000);

        let segment = normalizer.finish()?;
        assert_eq!(segment.path(), out.as_path());
        assert_eq!(segment.len(), 8);

        let gain = 32767.0f32 / 20000.0;
        let expected: Vec<i16> = [100i16, -200, 20000, 50]
            .iter()
            .map(|&s| (s as f32 * gain) as i32 as i16)
            .collect();
        assert_eq!(samples(&fs::read(&out)?), expected);

        assert!(!raw_path_for(&out).exists(), "raw store should be deleted");
        Ok(())
    }

    #[test]
    fn test_peak_is_monotonic() -> Result<()> {
        let dir = TempDir::new()?;
        let mut normalizer =
            GainNormalizer::create(dir.path().join("seg.pcm"), 1.0, SampleEncoding::Pcm16)?;

        normalizer.write(&pcm16(&[5000]))?;
        normalizer.write(&pcm16(&[10]))?;
        assert_eq!(normalizer.peak(), 5000);
        Ok(())
    }

    #[test]
    fn test_rescale_spans_chunk_boundaries() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("long.pcm");

        // Odd-sized frames force samples to straddle read chunks
        let input: Vec<i16> = (0..5000).map(|i| (i % 700) as i16 - 350).collect();
        let bytes = pcm16(&input);

        let mut normalizer = GainNormalizer::create(&out, 2.0, SampleEncoding::Pcm16)?;
        for frame in bytes.chunks(333) {
            normalizer.write(frame)?;
        }
        normalizer.finish()?;

        let output = samples(&fs::read(&out)?);
        let expected: Vec<i16> = input.iter().map(|&s| s * 2).collect();
        assert_eq!(output, expected);
        Ok(())
    }

    #[test]
    fn test_dangling_byte_is_preserved() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("odd.pcm");

        let mut bytes = pcm16(&[100]);
        bytes.push(0x7F);

        let mut normalizer = GainNormalizer::create(&out, 2.0, SampleEncoding::Pcm16)?;
        normalizer.write(&bytes)?;
        let segment = normalizer.finish()?;

        let written = fs::read(&out)?;
        assert_eq!(segment.len(), 3);
        assert_eq!(&written[..2], &200i16.to_le_bytes());
        assert_eq!(written[2], 0x7F);
        Ok(())
    }

    #[test]
    fn test_into_raw_defers_scaling() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("deferred.pcm");

        let mut normalizer = GainNormalizer::create(&out, 4.0, SampleEncoding::Pcm16)?;
        normalizer.write(&pcm16(&[1000, -1000]))?;
        let raw = normalizer.into_raw()?;

        assert_eq!(raw.peak(), 1000);
        assert_eq!(raw.len(), 4);
        assert!(raw.raw_path().exists());
        assert!(!out.exists(), "segment file is only written by rescale");

        let segment = raw.rescale(1.5)?;
        assert_eq!(samples(&fs::read(segment.path())?), vec![1500, -1500]);
        Ok(())
    }

    #[test]
    fn test_create_fails_in_missing_directory() {
        let result = GainNormalizer::create(
            "/nonexistent/dir/seg.pcm",
            1.0,
            SampleEncoding::Pcm16,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_raw_path_is_sibling() {
        let raw = raw_path_for(Path::new("/tmp/rec/record_tmp_1.pcm"));
        assert_eq!(raw, PathBuf::from("/tmp/rec/record_tmp_1.pcm.raw"));
    }
}
