use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

use super::segment::Segment;

/// Concatenate `segments` into `dest` in list order, then delete and clear them.
///
/// `dest` is truncated first. If anything fails the segments stay on disk and in
/// the list; `dest` may be partially written.
pub fn merge_segments(segments: &mut Vec<Segment>, dest: &Path) -> Result<u64> {
    if segments.is_empty() {
        bail!("No segments to merge into {:?}", dest);
    }

    let file =
        File::create(dest).with_context(|| format!("Failed to create merge output: {:?}", dest))?;
    let mut writer = BufWriter::new(file);
    let mut total = 0u64;

    for segment in segments.iter() {
        let input = File::open(segment.path())
            .with_context(|| format!("Failed to open segment: {:?}", segment.path()))?;
        let mut reader = BufReader::new(input);

        total += io::copy(&mut reader, &mut writer)
            .with_context(|| format!("Failed to copy segment: {:?}", segment.path()))?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to flush merge output: {:?}", dest))?;

    info!(
        "Merged {} segments into {} ({} bytes)",
        segments.len(),
        dest.display(),
        total
    );

    for segment in segments.drain(..) {
        if let Err(e) = fs::remove_file(segment.path()) {
            warn!("Failed to delete merged segment {:?}: {}", segment.path(), e);
        }
    }

    Ok(total)
}
