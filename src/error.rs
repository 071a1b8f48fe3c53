use thiserror::Error;

use crate::session::{Command, SessionState};

/// Errors reported to the error listener of a recording session
#[derive(Debug, Error)]
pub enum RecordError {
    /// Command not allowed in the current state; nothing changed
    #[error("cannot {command} while {state}")]
    InvalidTransition {
        state: SessionState,
        command: Command,
    },
    /// Capture device failed; the capture cycle was aborted
    #[error("capture failed: {0:#}")]
    Capture(anyhow::Error),
    /// Raw store or rescale pass failed; output may be partially written
    #[error("normalization failed: {0:#}")]
    Normalize(anyhow::Error),
    /// Segments could not be merged; they are left on disk
    #[error("merge failed: {0:#}")]
    Merge(anyhow::Error),
    /// Streaming encoder failed
    #[error("encoding failed: {0:#}")]
    Encode(anyhow::Error),
    /// Container header could not be written
    #[error("container finalization failed: {0:#}")]
    Container(anyhow::Error),
    #[error("invalid recording config: {0}")]
    InvalidConfig(String),
    /// The session task is gone
    #[error("recording session is closed")]
    SessionClosed,
}

impl RecordError {
    /// Short machine-readable kind, used in JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::InvalidTransition { .. } => "invalid_transition",
            RecordError::Capture(_) => "capture",
            RecordError::Normalize(_) => "normalize",
            RecordError::Merge(_) => "merge",
            RecordError::Encode(_) => "encode",
            RecordError::Container(_) => "container",
            RecordError::InvalidConfig(_) => "invalid_config",
            RecordError::SessionClosed => "session_closed",
        }
    }
}
