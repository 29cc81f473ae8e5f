//! Capture trait definitions
//!
//! Platform-agnostic boundary between a frame producer and the recorder.

use crate::recorder::config::RecorderConfiguration;
use crate::recorder::sink::FrameSink;
use thiserror::Error;

/// A decoded video frame, tightly packed RGBA8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// Solid-colour frame
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self { width, height, data }
    }

    /// Expected byte length for the frame dimensions
    pub fn expected_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }
}

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture device not found: {0}")]
    DeviceNotFound(String),

    #[error("Capture configuration rejected: {0}")]
    Configuration(String),

    #[error("Capture source already started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-screen preview target
///
/// The recorder never looks at preview frames; it only hands the surface
/// to the capture source, which renders into it.
pub trait PreviewSurface: Send {
    fn render(&mut self, frame: &RawFrame);
}

/// A live frame producer
///
/// `start` is called once per recorder lifetime. `configure` is called
/// again on every configuration change. Frames go to the sink from
/// whatever thread the source owns; the sink never blocks on buffer
/// internals beyond a short lock.
pub trait CaptureSource: Send {
    /// Identifier used in logs
    fn id(&self) -> &str;

    /// Apply quality and frame rate
    fn configure(&mut self, config: &RecorderConfiguration) -> Result<(), CaptureError>;

    /// Begin delivering frames to the sink
    fn start(&mut self, sink: FrameSink) -> Result<(), CaptureError>;

    /// Stop delivering frames
    fn stop(&mut self);

    /// Attach a preview surface
    fn attach_preview(&mut self, surface: Box<dyn PreviewSurface>) {
        tracing::debug!("{} does not render previews, dropping surface", self.id());
        drop(surface);
    }

    /// Detach the current preview surface, if any
    fn detach_preview(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_frame() {
        let frame = RawFrame::filled(4, 2, [10, 20, 30, 255]);
        assert_eq!(frame.data.len(), 32);
        assert!(frame.is_well_formed());
        assert_eq!(&frame.data[4..8], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_malformed_frame() {
        let frame = RawFrame::new(4, 4, vec![0; 10]);
        assert!(!frame.is_well_formed());
        assert_eq!(frame.expected_len(), 64);
    }
}
