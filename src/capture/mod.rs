//! Capture sources
//!
//! The recorder only needs "timestamped raw frames"; anything that can
//! push those into a [`FrameSink`](crate::recorder::FrameSink) is a source.

pub mod test_pattern;
pub mod traits;

#[cfg(feature = "webcam")]
pub mod webcam;

pub use test_pattern::TestPatternSource;
pub use traits::{CaptureError, CaptureSource, PreviewSurface, RawFrame};

#[cfg(feature = "webcam")]
pub use webcam::WebcamSource;
