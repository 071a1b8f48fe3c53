use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use loqa_recorder::{
    Config, OutputFormat, PeakScope, RecordConfig, RecordError, RecordSession, SampleEncoding,
    SessionState, WavFileBackend,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "loqa-recorder")]
#[command(about = "Record a WAV input through the capture pipeline")]
struct Args {
    /// WAV file played as the capture device
    #[arg(short, long)]
    input: PathBuf,

    /// Output file (defaults to <input>-recorded.<format>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output encoding
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// Maximum normalization gain (>= 1.0)
    #[arg(long)]
    max_gain: Option<f32>,

    /// Gain per segment instead of per recording
    #[arg(long)]
    per_segment_gain: bool,

    /// Config file (e.g. config/loqa-recorder)
    #[arg(short, long)]
    config: Option<String>,

    /// Deliver frames at real-time speed
    #[arg(long)]
    realtime: bool,

    /// Pause after this many seconds
    #[arg(long)]
    pause_at: Option<f64>,

    /// Resume this many milliseconds after pausing
    #[arg(long, default_value = "1000")]
    resume_after: u64,

    /// Also print level notifications
    #[arg(long)]
    levels: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Pcm,
    Wav,
    Mp3,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pcm => OutputFormat::Pcm,
            FormatArg::Wav => OutputFormat::Wav,
            FormatArg::Mp3 => OutputFormat::Mp3,
        }
    }
}

enum Done {
    Finished(PathBuf),
    Failed,
}

/// Decides from the notification stream whether the recording failed.
///
/// Stopping while paused passes through Idle on its way to Finished, so Idle
/// only means failure when an error came before it.
#[derive(Clone, Default)]
struct FailureWatch {
    errored: Arc<AtomicBool>,
}

impl FailureWatch {
    fn error(&self, err: &RecordError) -> bool {
        self.errored.store(true, Ordering::SeqCst);
        matches!(err, RecordError::InvalidConfig(_))
    }

    fn state(&self, state: SessionState) -> bool {
        match state {
            SessionState::Idle => self.errored.swap(false, Ordering::SeqCst),
            SessionState::Recording | SessionState::Finished => {
                self.errored.store(false, Ordering::SeqCst);
                false
            }
            _ => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries one JSON object per notification
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let (mut record, realtime) = match &args.config {
        Some(path) => {
            let cfg = Config::load(path)?;
            info!("Loaded config: {}", cfg.recorder.name);
            (cfg.record_config(), cfg.recorder.realtime || args.realtime)
        }
        None => (RecordConfig::default(), args.realtime),
    };

    apply_input_format(&mut record, &args.input)?;
    if let Some(format) = args.format {
        record.format = format.into();
    }
    if let Some(max_gain) = args.max_gain {
        record.max_gain = max_gain;
    }
    if args.per_segment_gain {
        record.peak_scope = PeakScope::Segment;
    }
    record.output_path = match &args.output {
        Some(output) => output.clone(),
        None if args.config.is_some() => record.output_path,
        None => default_output(&args.input, record.format),
    };

    info!(
        "Recording {} -> {} ({})",
        args.input.display(),
        record.output_path.display(),
        record.format
    );

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let (failed_tx, rejected_tx) = (done_tx.clone(), done_tx.clone());
    let watch = FailureWatch::default();
    let error_watch = watch.clone();
    let print_levels = args.levels;

    let session = RecordSession::builder()
        .capture_backend(WavFileBackend::new(&args.input).realtime(realtime))
        .on_state_change(move |state| {
            println!("{}", json!({ "event": "state", "state": state }));
            if watch.state(state) {
                let _ = failed_tx.send(Done::Failed);
            }
        })
        .on_error(move |err| {
            println!(
                "{}",
                json!({ "event": "error", "kind": err.kind(), "message": err.to_string() })
            );
            if error_watch.error(err) {
                let _ = rejected_tx.send(Done::Failed);
            }
        })
        .on_level(move |level| {
            if print_levels {
                println!("{}", json!({ "event": "level", "db": level }));
            }
        })
        .on_result(move |path| {
            println!("{}", json!({ "event": "result", "path": path }));
            let _ = done_tx.send(Done::Finished(path.to_path_buf()));
        })
        .build()?;

    session.start(record)?;

    if let Some(pause_at) = args.pause_at {
        sleep(Duration::from_secs_f64(pause_at.max(0.0))).await;
        session.pause()?;
        sleep(Duration::from_millis(args.resume_after)).await;
        session.resume()?;
    }

    let done = tokio::select! {
        done = done_rx.recv() => done,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping recording");
            session.stop()?;
            done_rx.recv().await
        }
    };

    println!(
        "{}",
        json!({ "event": "stats", "stats": session.stats() })
    );
    session.close().await;

    match done {
        Some(Done::Finished(path)) => {
            info!("Saved recording to {}", path.display());
            Ok(())
        }
        _ => bail!("Recording failed"),
    }
}

/// Capture format follows the input file
fn apply_input_format(record: &mut RecordConfig, input: &Path) -> Result<()> {
    let spec = hound::WavReader::open(input)
        .with_context(|| format!("Failed to open input: {:?}", input))?
        .spec();

    record.sample_rate = spec.sample_rate;
    record.channels = spec.channels;
    record.encoding = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => SampleEncoding::Pcm8,
        (hound::SampleFormat::Int, 16) => SampleEncoding::Pcm16,
        (format, bits) => bail!("Unsupported input: {}-bit {:?}", bits, format),
    };
    Ok(())
}

fn default_output(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    input.with_file_name(format!("{}-recorded.{}", stem, format))
}
