//! Recording session management
//!
//! `RecordSession` is a handle to one long-lived session task that:
//! - Drives the state machine (idle, recording, paused, stopping, finished)
//! - Spawns a capture thread per start/resume
//! - Routes frames to the gain normalizer or the MP3 encode queue
//! - Merges segments and writes the container header at stop
//! - Reports progress through listener callbacks

mod capture;
mod config;
mod events;
mod finalize;
mod session;
mod state;
mod stats;

pub use config::{OutputFormat, PeakScope, RecordConfig};
pub use events::{DataListener, ErrorListener, LevelListener, ResultListener, StateListener};
pub use finalize::Finalizer;
pub use session::{RecordSession, RecordSessionBuilder};
pub use state::{Command, SessionState};
pub use stats::SessionStats;
