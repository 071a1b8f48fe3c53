//! Canonical RIFF/WAVE header for merged PCM payloads

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Size of the canonical 44-byte header
pub const WAV_HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Build the header describing `payload_len` bytes of interleaved PCM
///
/// Fails when the block align or byte rate does not fit its header field.
pub fn wav_header(
    payload_len: u32,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
) -> Result<[u8; WAV_HEADER_LEN]> {
    let Some(block_align) = channels.checked_mul(bits_per_sample / 8) else {
        bail!(
            "Block align overflows: {} channels x {} bits",
            channels,
            bits_per_sample
        );
    };
    let Some(byte_rate) = sample_rate.checked_mul(block_align as u32) else {
        bail!(
            "Byte rate overflows: {} Hz x {} bytes per frame",
            sample_rate,
            block_align
        );
    };
    let riff_len = payload_len.wrapping_add(WAV_HEADER_LEN as u32 - 8);

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_len.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    header[20..22].copy_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&payload_len.to_le_bytes());
    Ok(header)
}

/// Insert a WAV header in front of the PCM payload already at `path`.
///
/// The payload is streamed through a sibling file, never held in memory. Returns
/// `false` without touching anything when the file is absent or empty.
pub fn prepend_wav_header(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
) -> Result<bool> {
    let payload_len = match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
        _ => {
            debug!("No payload at {:?}, skipping WAV header", path);
            return Ok(false);
        }
    };

    if payload_len > (u32::MAX - (WAV_HEADER_LEN as u32 - 8)) as u64 {
        bail!(
            "Payload of {} bytes is too large for a WAV container: {:?}",
            payload_len,
            path
        );
    }

    let header = wav_header(payload_len as u32, sample_rate, channels, bits_per_sample)
        .with_context(|| format!("Cannot describe payload as WAV: {:?}", path))?;

    let mut staged = path.as_os_str().to_os_string();
    staged.push(".payload");
    let staged = Path::new(&staged).to_path_buf();

    fs::rename(path, &staged)
        .with_context(|| format!("Failed to stage payload: {:?}", path))?;

    let file = File::create(path).with_context(|| format!("Failed to recreate {:?}", path))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&header)
        .with_context(|| format!("Failed to write WAV header: {:?}", path))?;

    let mut reader = BufReader::new(
        File::open(&staged).with_context(|| format!("Failed to reopen payload: {:?}", staged))?,
    );
    io::copy(&mut reader, &mut writer)
        .with_context(|| format!("Failed to copy payload behind header: {:?}", path))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush WAV file: {:?}", path))?;
    drop(reader);

    fs::remove_file(&staged)
        .with_context(|| format!("Failed to remove staged payload: {:?}", staged))?;

    info!(
        "WAV header written: {} ({} payload bytes, {}Hz, {} channels, {} bits)",
        path.display(),
        payload_len,
        sample_rate,
        channels,
        bits_per_sample
    );

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn test_header_sizes() {
        let header = wav_header(1000, 16000, 1, 16).unwrap();

        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32_at(&header, 4), 1036);
        assert_eq!(&header[8..16], b"WAVEfmt ");
        assert_eq!(u32_at(&header, 40), 1000);
    }

    #[test]
    fn test_header_format_fields() {
        let header = wav_header(0, 44100, 2, 16).unwrap();

        assert_eq!(u32_at(&header, 16), 16);
        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u16_at(&header, 22), 2);
        assert_eq!(u32_at(&header, 24), 44100);
        assert_eq!(u32_at(&header, 28), 44100 * 2 * 2);
        assert_eq!(u16_at(&header, 32), 4);
        assert_eq!(u16_at(&header, 34), 16);
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn test_header_8bit_mono() {
        let header = wav_header(8000, 8000, 1, 8).unwrap();
        assert_eq!(u32_at(&header, 28), 8000);
        assert_eq!(u16_at(&header, 32), 1);
        assert_eq!(u16_at(&header, 34), 8);
    }

    #[test]
    fn test_header_rejects_overflowing_format() {
        let err = wav_header(100, 48000, 40000, 16).unwrap_err();
        assert!(err.to_string().contains("Block align"), "{}", err);

        let err = wav_header(100, u32::MAX / 2, 2, 16).unwrap_err();
        assert!(err.to_string().contains("Byte rate"), "{}", err);
    }

    #[test]
    fn test_prepend_keeps_payload_intact() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("take.wav");
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        fs::write(&path, &payload)?;

        assert!(prepend_wav_header(&path, 16000, 1, 16)?);

        let bytes = fs::read(&path)?;
        assert_eq!(bytes.len(), payload.len() + WAV_HEADER_LEN);
        assert_eq!(&bytes[WAV_HEADER_LEN..], payload.as_slice());
        assert_eq!(u32_at(&bytes, 40), 10_000);
        assert_eq!(u32_at(&bytes, 4), 10_036);

        let staged = dir.path().join("take.wav.payload");
        assert!(!staged.exists());
        Ok(())
    }

    #[test]
    fn test_prepend_skips_empty_or_missing() -> Result<()> {
        let dir = TempDir::new()?;
        let empty = dir.path().join("empty.wav");
        fs::write(&empty, b"")?;

        assert!(!prepend_wav_header(&empty, 16000, 1, 16)?);
        assert_eq!(fs::read(&empty)?.len(), 0);

        assert!(!prepend_wav_header(&dir.path().join("absent.wav"), 16000, 1, 16)?);
        Ok(())
    }
}
