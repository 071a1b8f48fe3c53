use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Recording = 1,
    Paused = 2,
    /// Capture is winding down and the file is being finalized
    Stopping = 3,
    Finished = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Recording,
            2 => SessionState::Paused,
            3 => SessionState::Stopping,
            4 => SessionState::Finished,
            _ => SessionState::Idle,
        }
    }

    /// A recording is in progress (possibly paused or finalizing)
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Recording | SessionState::Paused | SessionState::Stopping
        )
    }

    /// State reached by applying `command`, or `None` if the command is not
    /// allowed from this state
    pub fn apply(self, command: Command) -> Option<SessionState> {
        use SessionState::*;

        match (self, command) {
            (Idle | Finished, Command::Start) => Some(Recording),
            (Recording, Command::Pause) => Some(Paused),
            (Paused, Command::Resume) => Some(Recording),
            (Recording, Command::Stop) => Some(Stopping),
            (Paused, Command::Stop) => Some(Idle),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Control commands accepted by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Session state shared between the session task (sole writer) and capture
/// threads (readers)
#[derive(Debug, Clone)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}
