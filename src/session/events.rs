//! Listener notifications
//!
//! Every callback runs on one dispatcher task, in the order the notifications
//! were raised. Capture and encoder threads only ever enqueue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::state::SessionState;
use crate::audio::{FrameBuffer, LevelMeter, SampleEncoding};
use crate::error::RecordError;

pub type StateListener = Box<dyn FnMut(SessionState) + Send>;
pub type ErrorListener = Box<dyn FnMut(&RecordError) + Send>;
pub type DataListener = Box<dyn FnMut(&[u8]) + Send>;
pub type LevelListener = Box<dyn FnMut(i32) + Send>;
pub type ResultListener = Box<dyn FnMut(&Path) + Send>;

/// Callbacks registered on a session; at most one per kind
#[derive(Default)]
pub(crate) struct Listeners {
    pub on_state: Option<StateListener>,
    pub on_error: Option<ErrorListener>,
    pub on_data: Option<DataListener>,
    pub on_level: Option<LevelListener>,
    pub on_spectrum: Option<DataListener>,
    pub on_result: Option<ResultListener>,
}

impl Listeners {
    /// Whether captured frames need to reach the dispatcher at all
    fn wants_frames(&self) -> bool {
        self.on_data.is_some() || self.wants_analysis()
    }

    fn wants_analysis(&self) -> bool {
        self.on_level.is_some() || self.on_spectrum.is_some()
    }

    fn dispatch(&mut self, notification: Notification, meter: &dyn LevelMeter) {
        match notification {
            Notification::State(state) => {
                if let Some(listener) = &mut self.on_state {
                    listener(state);
                }
            }
            Notification::Error(err) => {
                if let Some(listener) = &mut self.on_error {
                    listener(&err);
                }
            }
            Notification::Frame(frame, encoding) => {
                if let Some(listener) = &mut self.on_data {
                    listener(&frame);
                }
                if self.wants_analysis() {
                    if let Some(spectrum) = meter.spectrum(&frame, encoding) {
                        if let Some(listener) = &mut self.on_level {
                            listener(meter.decibels(&spectrum));
                        }
                        if let Some(listener) = &mut self.on_spectrum {
                            listener(&spectrum);
                        }
                    }
                }
            }
            Notification::Level(level) => {
                if let Some(listener) = &mut self.on_level {
                    listener(level);
                }
            }
            Notification::Result(path) => {
                if let Some(listener) = &mut self.on_result {
                    listener(&path);
                }
            }
        }
    }
}

#[derive(Debug)]
enum Notification {
    State(SessionState),
    Error(RecordError),
    Frame(FrameBuffer, SampleEncoding),
    Level(i32),
    Result(PathBuf),
}

/// Sending side of the dispatcher; cheap to clone into capture threads
#[derive(Clone)]
pub(crate) struct Notifier {
    sender: mpsc::UnboundedSender<Notification>,
    wants_frames: bool,
}

impl Notifier {
    /// Spawn the dispatcher task that owns `listeners`
    pub fn spawn(listeners: Listeners, meter: Arc<dyn LevelMeter>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let wants_frames = listeners.wants_frames();
        let mut listeners = listeners;

        let dispatcher = tokio::spawn(async move {
            debug!("Notification dispatcher started");
            while let Some(notification) = receiver.recv().await {
                listeners.dispatch(notification, meter.as_ref());
            }
            debug!("Notification dispatcher stopped");
        });

        (
            Self {
                sender,
                wants_frames,
            },
            dispatcher,
        )
    }

    fn send(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            debug!("Notification dropped, dispatcher is gone");
        }
    }

    pub fn state(&self, state: SessionState) {
        self.send(Notification::State(state));
    }

    pub fn error(&self, err: RecordError) {
        error!("Recording error: {}", err);
        self.send(Notification::Error(err));
    }

    /// Copy a captured frame out to the data and level listeners, if any
    pub fn frame(&self, frame: &[u8], encoding: SampleEncoding) {
        if self.wants_frames {
            self.send(Notification::Frame(frame.to_vec(), encoding));
        }
    }

    pub fn level(&self, level: i32) {
        self.send(Notification::Level(level));
    }

    pub fn result(&self, path: PathBuf) {
        self.send(Notification::Result(path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SpectrumLevelMeter;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        State(SessionState),
        Error(String),
        Data(usize),
        Level(i32),
        Spectrum(usize),
        Result(PathBuf),
    }

    fn recording_listeners(seen: &Arc<Mutex<Vec<Seen>>>) -> Listeners {
        let (a, b, c, d, e, f) = (
            Arc::clone(seen),
            Arc::clone(seen),
            Arc::clone(seen),
            Arc::clone(seen),
            Arc::clone(seen),
            Arc::clone(seen),
        );
        Listeners {
            on_state: Some(Box::new(move |state: SessionState| {
                a.lock().unwrap().push(Seen::State(state))
            })),
            on_error: Some(Box::new(move |err: &RecordError| {
                b.lock().unwrap().push(Seen::Error(err.to_string()))
            })),
            on_data: Some(Box::new(move |frame: &[u8]| {
                c.lock().unwrap().push(Seen::Data(frame.len()))
            })),
            on_level: Some(Box::new(move |level: i32| {
                d.lock().unwrap().push(Seen::Level(level))
            })),
            on_spectrum: Some(Box::new(move |bins: &[u8]| {
                e.lock().unwrap().push(Seen::Spectrum(bins.len()))
            })),
            on_result: Some(Box::new(move |path: &Path| {
                f.lock().unwrap().push(Seen::Result(path.to_path_buf()))
            })),
        }
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (notifier, dispatcher) =
            Notifier::spawn(recording_listeners(&seen), Arc::new(SpectrumLevelMeter::default()));

        notifier.state(SessionState::Recording);
        notifier.frame(&[0u8; 64], SampleEncoding::Pcm16);
        notifier.level(0);
        notifier.error(RecordError::SessionClosed);
        notifier.state(SessionState::Finished);
        notifier.result(PathBuf::from("/tmp/out.wav"));
        drop(notifier);
        dispatcher.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                Seen::State(SessionState::Recording),
                Seen::Data(64),
                Seen::Level(crate::audio::LEVEL_FLOOR_DB),
                Seen::Spectrum(16),
                Seen::Level(0),
                Seen::Error("recording session is closed".to_string()),
                Seen::State(SessionState::Finished),
                Seen::Result(PathBuf::from("/tmp/out.wav")),
            ]
        );
    }

    struct CountingMeter(Arc<Mutex<usize>>);

    impl LevelMeter for CountingMeter {
        fn spectrum(&self, _frame: &[u8], _encoding: SampleEncoding) -> Option<Vec<u8>> {
            *self.0.lock().unwrap() += 1;
            Some(vec![0; 4])
        }

        fn decibels(&self, _spectrum: &[u8]) -> i32 {
            40
        }
    }

    #[tokio::test]
    async fn test_meter_skipped_without_level_listeners() {
        let calls = Arc::new(Mutex::new(0));
        let data = Arc::new(Mutex::new(0));
        let data_seen = Arc::clone(&data);

        let listeners = Listeners {
            on_data: Some(Box::new(move |_: &[u8]| *data_seen.lock().unwrap() += 1)),
            ..Default::default()
        };
        let (notifier, dispatcher) =
            Notifier::spawn(listeners, Arc::new(CountingMeter(Arc::clone(&calls))));

        notifier.frame(&[1, 2, 3, 4], SampleEncoding::Pcm16);
        notifier.frame(&[1, 2, 3, 4], SampleEncoding::Pcm16);
        drop(notifier);
        dispatcher.await.unwrap();

        assert_eq!(*data.lock().unwrap(), 2);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_meter_runs_once_per_frame() {
        let calls = Arc::new(Mutex::new(0));
        let levels = Arc::new(Mutex::new(Vec::new()));
        let levels_seen = Arc::clone(&levels);

        let listeners = Listeners {
            on_level: Some(Box::new(move |level: i32| levels_seen.lock().unwrap().push(level))),
            on_spectrum: Some(Box::new(|_: &[u8]| {})),
            ..Default::default()
        };
        let (notifier, dispatcher) =
            Notifier::spawn(listeners, Arc::new(CountingMeter(Arc::clone(&calls))));

        for _ in 0..3 {
            notifier.frame(&[0; 8], SampleEncoding::Pcm16);
        }
        drop(notifier);
        dispatcher.await.unwrap();

        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(*levels.lock().unwrap(), vec![40, 40, 40]);
    }
}
