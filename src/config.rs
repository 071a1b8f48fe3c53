use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::session::RecordConfig;

/// Environment variables with this prefix override file settings,
/// e.g. `LOQA_RECORDER_RECORDING__MAX_GAIN=2.0`
pub const ENV_PREFIX: &str = "LOQA_RECORDER";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub recording: RecordConfig,
}

#[derive(Debug, Deserialize)]
pub struct RecorderConfig {
    pub name: String,
    /// Segment directory shared by every recording; `~` is expanded
    #[serde(default)]
    pub temp_dir: Option<String>,
    /// Pace file-backed capture at real-time speed
    #[serde(default)]
    pub realtime: bool,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    /// Recording defaults from the file, with `~` expanded in every path
    pub fn record_config(&self) -> RecordConfig {
        let mut record = self.recording.clone();
        record.output_path = expand(&record.output_path);
        record.temp_dir = match (&record.temp_dir, &self.recorder.temp_dir) {
            (Some(dir), _) => Some(expand(dir)),
            (None, Some(dir)) => Some(expand(Path::new(dir))),
            (None, None) => None,
        };
        record
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
