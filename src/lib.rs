//! Event Recorder - keep the last few seconds of video, freeze them on a
//! trigger, export them as standalone clips.
//!
//! Frames from a [`capture::CaptureSource`] flow into a disk-backed
//! [`buffer::RollingFrameBuffer`]. A trigger snapshots the window into a
//! [`buffer::Segment`], which [`export::SegmentExporter`] later renders
//! into a video file. [`recorder::Recorder`] ties it together.

pub mod buffer;
pub mod capture;
pub mod export;
pub mod recorder;
pub mod utils;

pub use recorder::Recorder;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a `tracing` subscriber honouring `RUST_LOG`
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "event_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
