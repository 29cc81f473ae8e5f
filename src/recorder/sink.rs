//! Frame delivery from capture sources
//!
//! A [`FrameSink`] is the only thing a capture source holds on to. It
//! forwards frames to the current rolling buffer while the recorder is
//! recording and drops them otherwise.

use super::state::RecorderState;
use crate::buffer::RollingFrameBuffer;
use crate::capture::RawFrame;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Route {
    state: RecorderState,
    buffer: Option<Arc<RollingFrameBuffer>>,
}

#[derive(Default)]
struct Shared {
    route: RwLock<Route>,
    dropped: AtomicU64,
}

/// Cloneable handle capture sources push frames into
#[derive(Clone, Default)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one frame. Returns whether it reached a buffer.
    pub fn push(&self, timestamp: DateTime<Utc>, frame: RawFrame) -> bool {
        // Held across the insert so a release cannot race an in-flight frame
        let route = self.shared.route.read();
        match (&route.buffer, route.state.accepts_frames()) {
            (Some(buffer), true) => {
                buffer.insert(timestamp, frame);
                true
            }
            _ => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Frames dropped because the recorder was not recording
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn state(&self) -> RecorderState {
        self.shared.route.read().state
    }

    /// Set the state, returning the previous one
    pub(crate) fn set_state(&self, state: RecorderState) -> RecorderState {
        std::mem::replace(&mut self.shared.route.write().state, state)
    }

    pub(crate) fn buffer(&self) -> Option<Arc<RollingFrameBuffer>> {
        self.shared.route.read().buffer.clone()
    }

    /// Swap the target buffer, returning the previous one
    pub(crate) fn replace_buffer(
        &self,
        buffer: Option<Arc<RollingFrameBuffer>>,
    ) -> Option<Arc<RollingFrameBuffer>> {
        std::mem::replace(&mut self.shared.route.write().buffer, buffer)
    }
}
