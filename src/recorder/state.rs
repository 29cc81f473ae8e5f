//! Recording state management
//!
//! Defines the recorder state machine states and the transition observer.

use serde::{Deserialize, Serialize};

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// Nothing is being buffered
    #[default]
    Idle,
    /// Frames are flowing into the rolling buffer
    Recording,
    /// Buffer is kept but incoming frames are dropped
    Paused,
}

impl RecorderState {
    pub fn accepts_frames(&self) -> bool {
        matches!(self, RecorderState::Recording)
    }
}

/// Called with `(old, new)` after every real transition
pub type StateObserver = Box<dyn Fn(RecorderState, RecorderState) + Send + Sync>;
