//! One capture cycle: the blocking read loop between a start/resume and the
//! next pause/stop.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::Notifier;
use super::finalize::PendingSegment;
use super::state::{SessionState, SharedState};
use super::stats::SessionCounters;
use crate::audio::{CaptureBackend, CaptureConfig, GainNormalizer};
use crate::encode::QueueHandle;
use crate::error::RecordError;
use crate::session::PeakScope;

/// Where captured frames go
pub(crate) enum FrameSink {
    /// Raw pass of a local segment
    Normalize {
        normalizer: GainNormalizer,
        scope: PeakScope,
    },
    /// Straight into the MP3 encoder
    Encode(QueueHandle),
}

impl FrameSink {
    fn write(&mut self, frame: Vec<u8>) -> Result<(), RecordError> {
        match self {
            FrameSink::Normalize { normalizer, .. } => {
                normalizer.write(&frame).map_err(RecordError::Normalize)
            }
            FrameSink::Encode(queue) => queue.push(frame).map_err(RecordError::Encode),
        }
    }

    /// Close the sink once the read loop is done
    fn close(self) -> Result<Option<PendingSegment>, RecordError> {
        match self {
            FrameSink::Normalize {
                normalizer,
                scope: PeakScope::Segment,
            } => normalizer
                .finish()
                .map(|segment| Some(PendingSegment::Ready(segment)))
                .map_err(RecordError::Normalize),
            FrameSink::Normalize {
                normalizer,
                scope: PeakScope::Session,
            } => normalizer
                .into_raw()
                .map(|raw| Some(PendingSegment::Unscaled(raw)))
                .map_err(RecordError::Normalize),
            FrameSink::Encode(_) => Ok(None),
        }
    }
}

/// How a capture cycle ended
#[derive(Debug)]
pub(crate) struct CycleOutcome {
    /// The closed segment, `None` on the encoder path
    pub result: Result<Option<PendingSegment>, RecordError>,
    /// The backend reported end of input
    pub exhausted: bool,
}

impl CycleOutcome {
    pub fn failed(err: RecordError) -> Self {
        Self {
            result: Err(err),
            exhausted: false,
        }
    }
}

pub(crate) struct CaptureCycle {
    pub backend: Arc<dyn CaptureBackend>,
    pub config: CaptureConfig,
    pub state: SharedState,
    pub sink: FrameSink,
    pub notifier: Notifier,
    pub counters: Arc<SessionCounters>,
}

impl CaptureCycle {
    /// Read frames while the session stays in `Recording`.
    ///
    /// Blocking; runs on its own thread.
    pub fn run(self) -> CycleOutcome {
        let CaptureCycle {
            backend,
            config,
            state,
            mut sink,
            notifier,
            counters,
        } = self;

        let mut stream = match backend.open(&config) {
            Ok(stream) => stream,
            Err(e) => {
                // Flushes whatever the sink holds before reporting
                drop(sink);
                return CycleOutcome::failed(RecordError::Capture(
                    e.context(format!("Failed to open capture backend {}", backend.name())),
                ));
            }
        };

        info!("Capture cycle started on {}", backend.name());

        let mut buf = vec![0u8; config.frame_bytes];
        let mut exhausted = false;
        let mut frames = 0u64;
        let mut failure = None;

        while state.get() == SessionState::Recording {
            let n = match stream.read(&mut buf) {
                Ok(0) => {
                    debug!("Capture input exhausted");
                    exhausted = true;
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    failure = Some(RecordError::Capture(
                        anyhow::Error::new(e).context("Capture read failed"),
                    ));
                    break;
                }
            };

            let frame = buf[..n].to_vec();
            notifier.frame(&frame, config.encoding);
            if let Err(e) = sink.write(frame) {
                failure = Some(e);
                break;
            }

            counters.record_frame(n);
            frames += 1;
        }

        stream.close();

        if let Some(err) = failure {
            warn!("Capture cycle aborted after {} frames", frames);
            drop(sink);
            return CycleOutcome::failed(err);
        }

        info!("Capture cycle ended after {} frames", frames);

        let result = sink.close();
        if matches!(result, Ok(Some(_))) {
            counters.record_segment();
        }

        CycleOutcome { result, exhausted }
    }
}
