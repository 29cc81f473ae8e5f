//! Video export module
//!
//! Turns captured segments into standalone video files through a muxer
//! backend (FFmpeg by default).

pub mod exporter;
pub mod ffmpeg;
pub mod muxer;
pub mod types;

pub use exporter::SegmentExporter;
pub use ffmpeg::FfmpegMuxer;
pub use muxer::{Muxer, MuxerSession, Rotation, SessionSettings};
pub use types::{
    CapturedArtifact, ContainerFormat, ExportError, ReadinessPolicy, VideoCodec, VideoQuality,
};
