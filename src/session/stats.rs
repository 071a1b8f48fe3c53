use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use super::state::SessionState;

/// Statistics about the current (or last) recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// State at the time of the snapshot
    pub state: SessionState,

    /// When the recording started, if one was ever started
    pub started_at: Option<DateTime<Utc>>,

    /// Wall-clock seconds since the recording started
    pub duration_secs: f64,

    /// Frames read from the capture backend
    pub frames_captured: u64,

    /// PCM bytes read from the capture backend
    pub bytes_captured: u64,

    /// Capture cycles that closed their segment
    pub segments_completed: usize,
}

/// Counters updated from capture threads and the session task
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    /// Milliseconds since the epoch; 0 means never started
    started_at_ms: AtomicI64,
    frames: AtomicU64,
    bytes: AtomicU64,
    segments: AtomicUsize,
}

impl SessionCounters {
    /// Zero everything for a new recording
    pub fn reset(&self) {
        self.started_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.frames.store(0, Ordering::SeqCst);
        self.bytes.store(0, Ordering::SeqCst);
        self.segments.store(0, Ordering::SeqCst);
    }

    pub fn record_frame(&self, bytes: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_segment(&self) {
        self.segments.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self, state: SessionState) -> SessionStats {
        let started_at = match self.started_at_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        };
        let duration_secs = started_at
            .map(|at| Utc::now().signed_duration_since(at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            state,
            started_at,
            duration_secs,
            frames_captured: self.frames.load(Ordering::Relaxed),
            bytes_captured: self.bytes.load(Ordering::Relaxed),
            segments_completed: self.segments.load(Ordering::SeqCst),
        }
    }
}
