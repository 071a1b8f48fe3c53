// Shared fakes for session integration tests
#![allow(dead_code)]

use anyhow::{bail, Result};
use loqa_recorder::{
    CaptureBackend, CaptureConfig, CaptureStream, EncoderBackend, EncoderConfig,
    RecordSessionBuilder, SessionState, StreamEncoder,
};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(10);

pub type FrameFn = dyn Fn(usize, usize) -> Vec<i16> + Send + Sync;

/// What a generator delivered, shared with the test
pub struct Generated {
    frame: Box<FrameFn>,
    limit: Option<usize>,
    pace: Duration,
    fail_open: bool,
    cycles: AtomicUsize,
    delivered: Mutex<Vec<(usize, Vec<u8>)>>,
}

impl Generated {
    pub fn cycles(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Frames delivered in `cycle`
    pub fn frames_in(&self, cycle: usize) -> usize {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == cycle)
            .count()
    }

    /// Every delivered byte, in delivery order
    pub fn bytes(&self) -> Vec<u8> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn samples_by_cycle(&self) -> Vec<(usize, Vec<i16>)> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(c, frame)| (*c, to_samples(frame)))
            .collect()
    }
}

/// 16-bit capture backend producing `frame(cycle, index)` on every read
#[derive(Clone)]
pub struct GeneratorBackend {
    shared: Arc<Generated>,
}

impl GeneratorBackend {
    pub fn new(frame: impl Fn(usize, usize) -> Vec<i16> + Send + Sync + 'static) -> Self {
        Self::build(Box::new(frame), None, false)
    }

    /// End of input after `limit` frames in each cycle
    pub fn limited(
        limit: usize,
        frame: impl Fn(usize, usize) -> Vec<i16> + Send + Sync + 'static,
    ) -> Self {
        Self::build(Box::new(frame), Some(limit), false)
    }

    /// Backend whose device never opens
    pub fn broken() -> Self {
        Self::build(Box::new(|_, _| Vec::new()), None, true)
    }

    fn build(frame: Box<FrameFn>, limit: Option<usize>, fail_open: bool) -> Self {
        Self {
            shared: Arc::new(Generated {
                frame,
                limit,
                pace: Duration::from_millis(2),
                fail_open,
                cycles: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn source(&self) -> Arc<Generated> {
        Arc::clone(&self.shared)
    }
}

impl CaptureBackend for GeneratorBackend {
    fn open(&self, _config: &CaptureConfig) -> Result<Box<dyn CaptureStream>> {
        if self.shared.fail_open {
            bail!("device unplugged");
        }
        let cycle = self.shared.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(GeneratorStream {
            shared: Arc::clone(&self.shared),
            cycle,
            index: 0,
        }))
    }

    fn name(&self) -> &str {
        "generator"
    }
}

struct GeneratorStream {
    shared: Arc<Generated>,
    cycle: usize,
    index: usize,
}

impl CaptureStream for GeneratorStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.shared.limit.is_some_and(|limit| self.index >= limit) {
            return Ok(0);
        }
        std::thread::sleep(self.shared.pace);

        let bytes = to_bytes(&(self.shared.frame)(self.cycle, self.index));
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);

        self.shared
            .delivered
            .lock()
            .unwrap()
            .push((self.cycle, bytes[..n].to_vec()));
        self.index += 1;
        Ok(n)
    }
}

/// Frames seen by a fake encoder
#[derive(Debug, Default)]
pub struct Journal {
    pub frames: Vec<Vec<u8>>,
    pub finished: bool,
    pub created: usize,
}

/// Encoder backend that writes PCM through unchanged and keeps a journal
#[derive(Clone, Default)]
pub struct JournalEncoderBackend {
    pub journal: Arc<Mutex<Journal>>,
    pub fail_at: Option<usize>,
    pub finish_delay: Duration,
}

impl EncoderBackend for JournalEncoderBackend {
    fn create(&self, output: &Path, _config: &EncoderConfig) -> Result<Box<dyn StreamEncoder>> {
        self.journal.lock().unwrap().created += 1;
        Ok(Box::new(JournalEncoder {
            file: File::create(output)?,
            journal: Arc::clone(&self.journal),
            fail_at: self.fail_at,
            finish_delay: self.finish_delay,
        }))
    }

    fn name(&self) -> &str {
        "journal"
    }
}

struct JournalEncoder {
    file: File,
    journal: Arc<Mutex<Journal>>,
    fail_at: Option<usize>,
    finish_delay: Duration,
}

impl StreamEncoder for JournalEncoder {
    fn encode(&mut self, pcm: &[u8]) -> Result<()> {
        let mut journal = self.journal.lock().unwrap();
        if self.fail_at == Some(journal.frames.len()) {
            bail!("lame choked");
        }
        self.file.write_all(pcm)?;
        journal.frames.push(pcm.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        std::thread::sleep(self.finish_delay);
        self.file.flush()?;
        self.journal.lock().unwrap().finished = true;
        Ok(())
    }
}

/// Listener notifications as seen by a test
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    State(SessionState),
    Error(&'static str),
    Level(i32),
    Result(PathBuf),
}

/// Attach state, error and result listeners feeding a channel
pub fn observe(builder: RecordSessionBuilder) -> (RecordSessionBuilder, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, error_tx, result_tx) = (tx.clone(), tx.clone(), tx);
    let builder = builder
        .on_state_change(move |state| {
            let _ = state_tx.send(Event::State(state));
        })
        .on_error(move |err| {
            let _ = error_tx.send(Event::Error(err.kind()));
        })
        .on_result(move |path| {
            let _ = result_tx.send(Event::Result(path.to_path_buf()));
        });
    (builder, rx)
}

/// Collect events up to and including the first one matching `until`
pub async fn collect_until(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    until: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(WAIT, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting, saw {:?}", seen))
            .expect("event channel closed");
        let done = until(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Next `n` events
pub async fn take(rx: &mut mpsc::UnboundedReceiver<Event>, n: usize) -> Vec<Event> {
    let mut seen = Vec::with_capacity(n);
    while seen.len() < n {
        let event = timeout(WAIT, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting, saw {:?}", seen))
            .expect("event channel closed");
        seen.push(event);
    }
    seen
}

pub async fn until_result(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    collect_until(rx, |e| matches!(e, Event::Result(_))).await
}

pub async fn until_state(rx: &mut mpsc::UnboundedReceiver<Event>, state: SessionState) -> Vec<Event> {
    collect_until(rx, |e| *e == Event::State(state)).await
}

/// Poll until `cond` holds
pub async fn eventually(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}

pub fn states(events: &[Event]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::State(s) => Some(*s),
            _ => None,
        })
        .collect()
}

pub fn to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|p| i16::from_le_bytes([p[0], p[1]]))
        .collect()
}

/// `sample * gain` narrowed the way the normalizer does it
pub fn scaled(sample: i16, gain: f32) -> i16 {
    (sample as f32 * gain) as i32 as i16
}
