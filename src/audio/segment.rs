use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory used when the configured one cannot be made a directory
pub const DEFAULT_TEMP_DIR_NAME: &str = "loqa-recorder";

/// One contiguous run of PCM bytes recorded between a start/resume and the next
/// pause/stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    path: PathBuf,
    len: u64,
}

impl Segment {
    pub fn new(path: PathBuf, len: u64) -> Self {
        Self { path, len }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes when the segment was closed
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Temporary segment directory and file naming
#[derive(Debug, Clone)]
pub struct SegmentStore {
    dir: PathBuf,
}

impl SegmentStore {
    /// Use `requested` as the segment directory, falling back to the default.
    ///
    /// The directory is created if missing. A plain file at that path is
    /// replaced by a directory.
    pub fn new(requested: Option<&Path>) -> Self {
        match requested {
            Some(dir) => match prepare_dir(dir) {
                Ok(()) => Self {
                    dir: dir.to_path_buf(),
                },
                Err(e) => {
                    warn!(
                        "Temp dir {:?} unusable ({:#}), falling back to default",
                        dir, e
                    );
                    Self::fallback()
                }
            },
            None => Self::fallback(),
        }
    }

    fn fallback() -> Self {
        let dir = default_temp_dir();
        if let Err(e) = prepare_dir(&dir) {
            warn!("Failed to prepare default temp dir {:?}: {:#}", dir, e);
        }
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a fresh segment file
    pub fn allocate(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H_%M_%S");
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = self
            .dir
            .join(format!("record_tmp_{}_{}.pcm", stamp, &id[..8]));

        info!("Allocated segment: {}", path.display());
        path
    }
}

pub fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_TEMP_DIR_NAME)
}

fn prepare_dir(dir: &Path) -> Result<()> {
    if dir.is_file() {
        fs::remove_file(dir)
            .with_context(|| format!("Failed to remove file in place of temp dir: {:?}", dir))?;
    }

    fs::create_dir_all(dir).with_context(|| format!("Failed to create temp dir: {:?}", dir))?;

    if !dir.is_dir() {
        anyhow::bail!("{:?} is not a directory", dir);
    }

    Ok(())
}
