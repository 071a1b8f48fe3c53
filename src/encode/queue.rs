//! Producer/consumer queue in front of a streaming encoder
//!
//! The capture thread pushes frames; a dedicated worker thread owns the encoder
//! and feeds it in FIFO order. `stop_safe` drains everything already queued,
//! closes the encoder and only then runs the completion callback.

use anyhow::{anyhow, bail, Context, Result};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::StreamEncoder;
use crate::audio::FrameBuffer;

/// Completion callback handed to [`EncodeQueue::stop_safe`]
pub type FinishCallback = Box<dyn FnOnce(Result<EncodeSummary>) + Send>;

/// What the worker fed to the encoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeSummary {
    pub frames: u64,
    pub bytes: u64,
}

#[derive(Clone)]
enum FrameSender {
    Bounded(mpsc::Sender<FrameBuffer>),
    Unbounded(mpsc::UnboundedSender<FrameBuffer>),
}

enum FrameReceiver {
    Bounded(mpsc::Receiver<FrameBuffer>),
    Unbounded(mpsc::UnboundedReceiver<FrameBuffer>),
}

impl FrameReceiver {
    async fn recv(&mut self) -> Option<FrameBuffer> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<FrameBuffer> {
        match self {
            Self::Bounded(rx) => rx.try_recv().ok(),
            Self::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

fn frame_channel(capacity: Option<usize>) -> (FrameSender, FrameReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (FrameSender::Bounded(tx), FrameReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (FrameSender::Unbounded(tx), FrameReceiver::Unbounded(rx))
        }
    }
}

/// Cloneable push side of the queue, handed to capture threads
#[derive(Clone)]
pub struct QueueHandle {
    sender: FrameSender,
    accepting: Arc<AtomicBool>,
}

impl QueueHandle {
    /// Enqueue a frame.
    ///
    /// Never blocks on an unbounded queue. On a bounded queue this waits while
    /// the queue is full, so it must not be called from an async task.
    pub fn push(&self, frame: FrameBuffer) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            bail!("Encode queue is no longer accepting frames");
        }

        let sent = match &self.sender {
            FrameSender::Bounded(tx) => tx.blocking_send(frame).is_ok(),
            FrameSender::Unbounded(tx) => tx.send(frame).is_ok(),
        };
        if !sent {
            bail!("Encode worker has exited");
        }
        Ok(())
    }
}

/// Encoder worker plus its queue
pub struct EncodeQueue {
    handle: QueueHandle,
    stop: Option<oneshot::Sender<FinishCallback>>,
    worker: Option<JoinHandle<()>>,
}

impl EncodeQueue {
    /// Spawn the worker thread; it becomes the sole owner of `encoder`.
    ///
    /// `capacity` of `None` gives an unbounded queue.
    pub fn spawn(encoder: Box<dyn StreamEncoder>, capacity: Option<usize>) -> Result<Self> {
        let (sender, receiver) = frame_channel(capacity);
        let (stop, stop_rx) = oneshot::channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .context("Failed to build encode worker runtime")?;

        let worker = std::thread::Builder::new()
            .name("encode-worker".to_string())
            .spawn(move || run_worker(runtime, encoder, receiver, stop_rx))
            .context("Failed to spawn encode worker")?;

        info!("Encode queue started (capacity: {:?})", capacity);

        Ok(Self {
            handle: QueueHandle {
                sender,
                accepting: Arc::new(AtomicBool::new(true)),
            },
            stop: Some(stop),
            worker: Some(worker),
        })
    }

    /// Push side for capture threads
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn push(&self, frame: FrameBuffer) -> Result<()> {
        self.handle.push(frame)
    }

    /// Stop accepting frames, drain the queue, close the encoder, then call
    /// `on_finish` exactly once from the worker thread.
    ///
    /// Returns immediately and never waits on a full queue. If the worker is
    /// already gone `on_finish` runs here with an error.
    pub fn stop_safe(&mut self, on_finish: impl FnOnce(Result<EncodeSummary>) + Send + 'static) {
        self.handle.accepting.store(false, Ordering::SeqCst);

        let Some(stop) = self.stop.take() else {
            on_finish(Err(anyhow!("Encode queue was already stopped")));
            return;
        };

        debug!("Encode queue stop requested");
        if let Err(on_finish) = stop.send(Box::new(on_finish)) {
            on_finish(Err(anyhow!("Encode worker exited before stop")));
        }
    }

    /// Wait for the worker thread to exit
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Encode worker panicked");
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run an encoder call, turning a panic into an error
fn guarded(call: impl FnOnce() -> Result<()>) -> Result<()> {
    catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(anyhow!("Encoder panicked: {}", panic_message(payload))))
}

struct Feeder {
    encoder: Box<dyn StreamEncoder>,
    summary: EncodeSummary,
    failure: Option<anyhow::Error>,
}

impl Feeder {
    /// Encode one frame; after a failure frames are only discarded
    fn feed(&mut self, frame: FrameBuffer) {
        if self.failure.is_some() {
            return;
        }
        let encoder = &mut self.encoder;
        match guarded(|| encoder.encode(&frame)) {
            Ok(()) => {
                self.summary.frames += 1;
                self.summary.bytes += frame.len() as u64;
            }
            Err(e) => {
                error!("Encoder failed, discarding remaining frames: {:#}", e);
                self.failure = Some(e);
            }
        }
    }

    fn finish(mut self) -> Result<EncodeSummary> {
        let encoder = &mut self.encoder;
        let finished = guarded(|| encoder.finish());
        match (self.failure, finished) {
            (Some(e), _) => Err(e),
            (None, Err(e)) => Err(e.context("Failed to close encoder")),
            (None, Ok(())) => Ok(self.summary),
        }
    }
}

fn run_worker(
    runtime: Runtime,
    encoder: Box<dyn StreamEncoder>,
    mut frames: FrameReceiver,
    mut stop: oneshot::Receiver<FinishCallback>,
) {
    let mut feeder = Feeder {
        encoder,
        summary: EncodeSummary::default(),
        failure: None,
    };

    let on_finish = runtime.block_on(async {
        loop {
            tokio::select! {
                biased;
                frame = frames.recv() => match frame {
                    Some(frame) => feeder.feed(frame),
                    None => break (&mut stop).await.ok(),
                },
                on_finish = &mut stop => break on_finish.ok(),
            }
        }
    });

    // Frames that raced with the stop request
    while let Some(frame) = frames.try_recv() {
        feeder.feed(frame);
    }
    drop(frames);

    let result = feeder.finish();
    match &result {
        Ok(summary) => info!(
            "Encode queue drained: {} frames, {} bytes",
            summary.frames, summary.bytes
        ),
        Err(e) => warn!("Encode queue finished with error: {:#}", e),
    }

    match on_finish {
        Some(on_finish) => on_finish(result),
        None => debug!("Encode queue dropped without stop request"),
    }
}
