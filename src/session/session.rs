use anyhow::anyhow;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::capture::{CaptureCycle, CycleOutcome, FrameSink};
use super::config::RecordConfig;
use super::events::{Listeners, Notifier};
use super::finalize::{self, Finalizer, PendingSegment};
use super::state::{Command, SessionState, SharedState};
use super::stats::{SessionCounters, SessionStats};
use crate::audio::{CaptureBackend, GainNormalizer, LevelMeter, SegmentStore, SpectrumLevelMeter};
use crate::encode::{EncodeQueue, EncoderBackend, FfmpegMp3Backend};
use crate::error::RecordError;

/// Builds a [`RecordSession`] with its collaborators and listeners
pub struct RecordSessionBuilder {
    backend: Option<Arc<dyn CaptureBackend>>,
    encoder: Arc<dyn EncoderBackend>,
    meter: Arc<dyn LevelMeter>,
    listeners: Listeners,
}

impl Default for RecordSessionBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            encoder: Arc::new(FfmpegMp3Backend::new()),
            meter: Arc::new(SpectrumLevelMeter::default()),
            listeners: Listeners::default(),
        }
    }
}

impl RecordSessionBuilder {
    /// Audio source; required
    pub fn capture_backend(mut self, backend: impl CaptureBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// MP3 encoder factory; defaults to ffmpeg
    pub fn encoder_backend(mut self, encoder: impl EncoderBackend + 'static) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    pub fn level_meter(mut self, meter: impl LevelMeter + 'static) -> Self {
        self.meter = Arc::new(meter);
        self
    }

    pub fn on_state_change(mut self, listener: impl FnMut(SessionState) + Send + 'static) -> Self {
        self.listeners.on_state = Some(Box::new(listener));
        self
    }

    pub fn on_error(mut self, listener: impl FnMut(&RecordError) + Send + 'static) -> Self {
        self.listeners.on_error = Some(Box::new(listener));
        self
    }

    /// Every captured frame, before normalization
    pub fn on_data(mut self, listener: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.listeners.on_data = Some(Box::new(listener));
        self
    }

    /// Decibel estimate per frame; 0 when capture pauses or stops
    pub fn on_level(mut self, listener: impl FnMut(i32) + Send + 'static) -> Self {
        self.listeners.on_level = Some(Box::new(listener));
        self
    }

    pub fn on_spectrum(mut self, listener: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.listeners.on_spectrum = Some(Box::new(listener));
        self
    }

    /// Final file path, once per completed recording
    pub fn on_result(mut self, listener: impl FnMut(&Path) + Send + 'static) -> Self {
        self.listeners.on_result = Some(Box::new(listener));
        self
    }

    /// Spawn the session and dispatcher tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<RecordSession, RecordError> {
        let backend = self
            .backend
            .ok_or_else(|| RecordError::InvalidConfig("no capture backend set".to_string()))?;

        info!(
            "Creating record session (capture: {}, encoder: {})",
            backend.name(),
            self.encoder.name()
        );

        let (notifier, dispatcher) = Notifier::spawn(self.listeners, self.meter);
        let state = SharedState::new(SessionState::Idle);
        let counters = Arc::new(SessionCounters::default());
        let (requests, receiver) = mpsc::unbounded_channel();

        let session_task = SessionTask {
            state: state.clone(),
            backend,
            encoder: self.encoder,
            notifier,
            counters: Arc::clone(&counters),
            recording: None,
            cycle: None,
        };
        let task = tokio::spawn(session_task.run(receiver, dispatcher));

        Ok(RecordSession {
            requests,
            state,
            counters,
            task,
        })
    }
}

#[derive(Debug)]
enum Request {
    Start(Box<RecordConfig>),
    Pause,
    Resume,
    Stop,
}

impl Request {
    fn command(&self) -> Command {
        match self {
            Request::Start(_) => Command::Start,
            Request::Pause => Command::Pause,
            Request::Resume => Command::Resume,
            Request::Stop => Command::Stop,
        }
    }
}

/// Handle to a recording session
///
/// Control methods only enqueue a command and return. Progress, errors and the
/// final file are reported through the listeners given to the builder. The only
/// error returned directly is [`RecordError::SessionClosed`].
pub struct RecordSession {
    requests: mpsc::UnboundedSender<Request>,
    state: SharedState,
    counters: Arc<SessionCounters>,
    task: JoinHandle<()>,
}

impl RecordSession {
    pub fn builder() -> RecordSessionBuilder {
        RecordSessionBuilder::default()
    }

    /// Begin a new recording with `config`
    pub fn start(&self, config: RecordConfig) -> Result<(), RecordError> {
        self.send(Request::Start(Box::new(config)))
    }

    pub fn pause(&self) -> Result<(), RecordError> {
        self.send(Request::Pause)
    }

    pub fn resume(&self) -> Result<(), RecordError> {
        self.send(Request::Resume)
    }

    /// Finish the recording; the result listener fires once the file is complete
    pub fn stop(&self) -> Result<(), RecordError> {
        self.send(Request::Stop)
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot(self.state.get())
    }

    /// Shut the session down once queued commands are handled.
    ///
    /// A recording still in progress at that point is abandoned. Returns after
    /// every listener callback has run.
    pub async fn close(self) {
        let RecordSession { requests, task, .. } = self;
        drop(requests);
        if let Err(e) = task.await {
            error!("Session task panicked: {}", e);
        }
    }

    fn send(&self, request: Request) -> Result<(), RecordError> {
        debug!("Session command: {}", request.command());
        self.requests
            .send(request)
            .map_err(|_| RecordError::SessionClosed)
    }
}

/// Per-recording data owned by the session task
struct Recording {
    config: RecordConfig,
    store: SegmentStore,
    finalizer: Finalizer,
    segments: Vec<PendingSegment>,
    encoder: Option<EncodeQueue>,
}

/// The single writer of session state
struct SessionTask {
    state: SharedState,
    backend: Arc<dyn CaptureBackend>,
    encoder: Arc<dyn EncoderBackend>,
    notifier: Notifier,
    counters: Arc<SessionCounters>,
    recording: Option<Recording>,
    cycle: Option<JoinHandle<CycleOutcome>>,
}

impl SessionTask {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>, dispatcher: JoinHandle<()>) {
        debug!("Session task started");

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                outcome = wait_cycle(&mut self.cycle), if self.cycle.is_some() => {
                    self.cycle = None;
                    self.cycle_ended(outcome).await;
                }
            }
        }

        self.shutdown().await;

        // Last notifier goes with the task; the dispatcher then drains and exits
        drop(self);
        if let Err(e) = dispatcher.await {
            error!("Notification dispatcher panicked: {}", e);
        }
        debug!("Session task stopped");
    }

    async fn handle(&mut self, request: Request) {
        let command = request.command();
        let current = self.state.get();

        let Some(next) = current.apply(command) else {
            warn!("Rejected {} while {}", command, current);
            self.notifier.error(RecordError::InvalidTransition {
                state: current,
                command,
            });
            return;
        };

        match request {
            Request::Start(config) => self.start(*config),
            Request::Pause => self.pause().await,
            Request::Resume => self.begin_cycle(),
            Request::Stop => self.stop(next).await,
        }
    }

    fn start(&mut self, config: RecordConfig) {
        if let Err(reason) = config.validate() {
            self.notifier.error(RecordError::InvalidConfig(reason));
            return;
        }

        let finalizer = Finalizer::for_config(&config);
        let encoder = if finalizer.uses_encoder() {
            let spawned = self
                .encoder
                .create(&config.output_path, &config.encoder_config())
                .and_then(|encoder| EncodeQueue::spawn(encoder, config.encode_queue_capacity));
            match spawned {
                Ok(queue) => Some(queue),
                Err(e) => {
                    self.notifier.error(RecordError::Encode(e));
                    return;
                }
            }
        } else {
            None
        };

        let store = SegmentStore::new(config.temp_dir.as_deref());

        info!(
            "Starting recording: {} ({}, {}Hz, {} channels, {:?}, max gain {})",
            config.output_path.display(),
            config.format,
            config.sample_rate,
            config.channels,
            config.encoding,
            config.max_gain
        );

        self.counters.reset();
        self.recording = Some(Recording {
            config,
            store,
            finalizer,
            segments: Vec::new(),
            encoder,
        });
        self.begin_cycle();
    }

    /// Open the sink for a new segment and spawn the capture thread
    fn begin_cycle(&mut self) {
        let Some(recording) = &self.recording else {
            error!("No recording to capture into");
            return;
        };

        let sink = match &recording.encoder {
            Some(queue) => Ok(FrameSink::Encode(queue.handle())),
            None => GainNormalizer::create(
                recording.store.allocate(),
                recording.config.max_gain,
                recording.config.encoding,
            )
            .map(|normalizer| FrameSink::Normalize {
                normalizer,
                scope: recording.config.peak_scope,
            })
            .map_err(RecordError::Normalize),
        };
        let capture_config = recording.config.capture_config();

        let sink = match sink {
            Ok(sink) => sink,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        let cycle = CaptureCycle {
            backend: Arc::clone(&self.backend),
            config: capture_config,
            state: self.state.clone(),
            sink,
            notifier: self.notifier.clone(),
            counters: Arc::clone(&self.counters),
        };

        // The capture loop runs only while the state says Recording
        self.set_state(SessionState::Recording);
        self.cycle = Some(tokio::task::spawn_blocking(move || cycle.run()));
    }

    async fn pause(&mut self) {
        self.set_state(SessionState::Paused);
        self.notifier.level(0);

        if let Some(outcome) = self.join_cycle().await {
            self.absorb(outcome);
        }
    }

    /// `next` is `Stopping` when recording, `Idle` when paused
    async fn stop(&mut self, next: SessionState) {
        self.set_state(next);
        self.notifier.level(0);

        if let Some(outcome) = self.join_cycle().await {
            if !self.absorb(outcome) {
                return;
            }
        }

        self.finalize().await;
    }

    /// A capture thread exited without being asked to
    async fn cycle_ended(&mut self, outcome: CycleOutcome) {
        let exhausted = outcome.exhausted;
        if !self.absorb(outcome) {
            return;
        }

        if exhausted && self.state.get() == SessionState::Recording {
            info!("Capture input ended, stopping recording");
            self.set_state(SessionState::Stopping);
            self.notifier.level(0);
            self.finalize().await;
        }
    }

    async fn join_cycle(&mut self) -> Option<CycleOutcome> {
        let handle = self.cycle.take()?;
        Some(cycle_outcome(handle.await))
    }

    /// Keep the segment from a finished cycle; false if the cycle failed
    fn absorb(&mut self, outcome: CycleOutcome) -> bool {
        match outcome.result {
            Ok(Some(segment)) => {
                if let Some(recording) = &mut self.recording {
                    recording.segments.push(segment);
                    debug!("Recording holds {} segments", recording.segments.len());
                }
                true
            }
            Ok(None) => true,
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    /// Report `err`, drop the recording and fall back to idle
    fn fail(&mut self, err: RecordError) {
        self.notifier.error(err);

        if let Some(mut recording) = self.recording.take() {
            finalize::abandon(&recording.segments);
            if let Some(mut queue) = recording.encoder.take() {
                queue.stop_safe(|result| {
                    if let Err(e) = result {
                        warn!("Encoder closed with error after failure: {:#}", e);
                    }
                });
            }
        }

        self.notifier.level(0);
        self.set_state(SessionState::Idle);
    }

    /// Produce the final file and report it
    async fn finalize(&mut self) {
        let Some(mut recording) = self.recording.take() else {
            error!("No recording to finalize");
            return;
        };
        let output = recording.config.output_path.clone();

        if let Some(mut queue) = recording.encoder.take() {
            let (done_tx, done_rx) = oneshot::channel();
            queue.stop_safe(move |result| {
                let _ = done_tx.send(result);
            });

            match done_rx.await {
                Ok(Ok(summary)) => info!(
                    "Encoder drained {} frames ({} bytes)",
                    summary.frames, summary.bytes
                ),
                Ok(Err(e)) => self.notifier.error(RecordError::Encode(e)),
                Err(_) => self.notifier.error(RecordError::Encode(anyhow!(
                    "Encoder worker exited without reporting"
                ))),
            }

            if tokio::task::spawn_blocking(move || queue.join()).await.is_err() {
                warn!("Failed to join encode worker");
            }
        } else {
            let Recording {
                config,
                store,
                finalizer,
                segments,
                ..
            } = recording;

            info!("Finalizing {} segments into {}", segments.len(), output.display());
            let made = tokio::task::spawn_blocking(move || {
                finalizer.make_file(segments, &config.output_path, config.max_gain, config.encoding)
            })
            .await;

            let failure = match made {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(RecordError::Merge(anyhow!("Finalize task failed: {}", e))),
            };
            if let Some(err) = failure {
                warn!("Segment files kept in {}", store.dir().display());
                self.notifier.error(err);
                self.set_state(SessionState::Idle);
                return;
            }
        }

        info!("Recording finished: {}", output.display());
        self.set_state(SessionState::Finished);
        self.notifier.result(output);
    }

    /// Requests channel closed; abandon anything in progress
    async fn shutdown(&mut self) {
        let state = self.state.get();
        if !state.is_active() {
            return;
        }

        warn!("Session closed while {}, abandoning recording", state);
        self.state.set(SessionState::Idle);

        if let Some(outcome) = self.join_cycle().await {
            if let (Ok(Some(segment)), Some(recording)) = (outcome.result, &mut self.recording) {
                recording.segments.push(segment);
            }
        }

        if let Some(mut recording) = self.recording.take() {
            finalize::abandon(&recording.segments);
            if let Some(mut queue) = recording.encoder.take() {
                queue.stop_safe(|_| {});
            }
        }

        self.notifier.state(SessionState::Idle);
    }

    fn set_state(&mut self, state: SessionState) {
        self.state.set(state);
        info!("Session state: {}", state);
        self.notifier.state(state);
    }
}

/// Resolves when the current capture thread exits; pending if there is none
async fn wait_cycle(cycle: &mut Option<JoinHandle<CycleOutcome>>) -> CycleOutcome {
    match cycle {
        Some(handle) => cycle_outcome(handle.await),
        None => std::future::pending().await,
    }
}

fn cycle_outcome(joined: Result<CycleOutcome, JoinError>) -> CycleOutcome {
    joined.unwrap_or_else(|e| {
        CycleOutcome::failed(RecordError::Capture(anyhow!("Capture thread panicked: {}", e)))
    })
}
