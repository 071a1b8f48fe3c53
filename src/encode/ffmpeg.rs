//! MP3 encoding through an external FFmpeg process
//!
//! Raw PCM is piped to ffmpeg's stdin and libmp3lame writes the output file.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use super::{EncoderBackend, EncoderConfig, StreamEncoder};
use crate::audio::SampleEncoding;

pub const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";

/// ffmpeg diagnostics kept for the error message
const STDERR_TAIL_LINES: usize = 20;

/// Spawns one ffmpeg process per recording
pub struct FfmpegMp3Backend {
    program: PathBuf,
}

impl FfmpegMp3Backend {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_FFMPEG_PROGRAM),
        }
    }

    /// Use a specific ffmpeg binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Build ffmpeg args for reading PCM from stdin
    fn build_args(output: &Path, config: &EncoderConfig) -> Vec<String> {
        let input_format = match config.encoding {
            SampleEncoding::Pcm8 => "u8",
            SampleEncoding::Pcm16 => "s16le",
        };

        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            input_format.to_string(),
            "-ar".to_string(),
            config.sample_rate.to_string(),
            "-ac".to_string(),
            config.channels.to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            format!("{}k", config.bitrate_kbps),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

impl Default for FfmpegMp3Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for FfmpegMp3Backend {
    fn create(&self, output: &Path, config: &EncoderConfig) -> Result<Box<dyn StreamEncoder>> {
        let args = Self::build_args(output, config);
        debug!("Spawning {} {:?}", self.program.display(), args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    anyhow!("ffmpeg not found at {:?}", self.program)
                } else {
                    anyhow!("Failed to start ffmpeg: {}", e)
                }
            })?;

        let stdin = child
            .stdin
            .take()
            .context("ffmpeg stdin was not captured")?;

        let stderr_tail = match child.stderr.take() {
            Some(pipe) => Some(drain_stderr(pipe)?),
            None => None,
        };

        info!(
            "MP3 encoder started: {} ({}Hz, {} channels, {}kbps)",
            output.display(),
            config.sample_rate,
            config.channels,
            config.bitrate_kbps
        );

        Ok(Box::new(FfmpegMp3Encoder {
            child,
            stdin: Some(stdin),
            stderr_tail,
            output: output.to_path_buf(),
        }))
    }

    fn name(&self) -> &str {
        "ffmpeg-mp3"
    }
}

struct FfmpegMp3Encoder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_tail: Option<JoinHandle<String>>,
    output: PathBuf,
}

/// Read ffmpeg's stderr until it closes so the process never stalls on a full
/// pipe; the thread yields the last few lines.
fn drain_stderr(pipe: impl Read + Send + 'static) -> Result<JoinHandle<String>> {
    std::thread::Builder::new()
        .name("ffmpeg-stderr".to_string())
        .spawn(move || {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            for line in BufReader::new(pipe).lines() {
                let Ok(line) = line else { break };
                debug!("ffmpeg: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        })
        .context("Failed to spawn ffmpeg stderr reader")
}

impl StreamEncoder for FfmpegMp3Encoder {
    fn encode(&mut self, pcm: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .context("ffmpeg input is already closed")?;
        stdin
            .write_all(pcm)
            .context("Failed to pipe PCM into ffmpeg")
    }

    fn finish(&mut self) -> Result<()> {
        // EOF on stdin lets ffmpeg flush the last MP3 frames
        drop(self.stdin.take());

        let status = self.child.wait().context("Failed to wait for ffmpeg")?;
        let stderr = self
            .stderr_tail
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        if !status.success() {
            bail!("ffmpeg exited with {}: {}", status, stderr.trim());
        }

        info!("MP3 encoder finished: {}", self.output.display());
        Ok(())
    }
}

impl Drop for FfmpegMp3Encoder {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            warn!("MP3 encoder dropped without finish, killing ffmpeg");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
