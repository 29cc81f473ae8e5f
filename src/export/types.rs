//! Export types and configuration
//!
//! Quality, codec and container settings shared by the recorder
//! configuration and the muxer, plus the export result and error types.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

/// Capture and encode quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl VideoQuality {
    /// Frame dimensions for this preset (landscape, before rotation)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            VideoQuality::Low => (640, 480),
            VideoQuality::Medium => (1280, 720),
            VideoQuality::High => (1920, 1080),
            VideoQuality::Ultra => (3840, 2160),
        }
    }

    /// CRF value for H.264/HEVC encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            VideoQuality::Low => 28,
            VideoQuality::Medium => 23,
            VideoQuality::High => 20,
            VideoQuality::Ultra => 18,
        }
    }

    /// x264/x265 preset name
    pub fn preset(&self) -> &'static str {
        match self {
            VideoQuality::Low => "veryfast",
            VideoQuality::Medium => "faster",
            VideoQuality::High => "medium",
            VideoQuality::Ultra => "slow",
        }
    }
}

/// Requested video codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// Let the container decide
    #[default]
    Preferred,
    H264,
    Hevc,
}

impl VideoCodec {
    /// FFmpeg encoder name for this codec inside `container`
    pub fn ffmpeg_encoder(&self, container: ContainerFormat) -> &'static str {
        match (self, container) {
            (VideoCodec::H264, _) => "libx264",
            (VideoCodec::Hevc, _) => "libx265",
            (VideoCodec::Preferred, ContainerFormat::Mp4) => "libx264",
            (VideoCodec::Preferred, ContainerFormat::Mov) => "libx265",
        }
    }
}

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Mov,
}

impl ContainerFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
        }
    }
}

/// A finished, muxed video file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedArtifact {
    pub output_path: PathBuf,
}

impl CapturedArtifact {
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Container duration in seconds, probed from the file itself
    pub fn duration(&self) -> Option<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(&self.output_path)
            .output()
            .map_err(|e| tracing::warn!("Failed to run ffprobe: {}", e))
            .ok()?;

        if !output.status.success() {
            tracing::warn!(
                "ffprobe failed for {:?}: {}",
                self.output_path,
                String::from_utf8_lossy(&output.stderr)
            );
            return None;
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout.trim().parse::<f64>().ok().filter(|d| d.is_finite())
}

/// How the exporter waits for a segment's frames to land on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadinessPolicy {
    /// First delay between polls
    pub poll_interval_ms: u64,
    /// Multiplier applied to the delay after every poll (1.0 = fixed)
    pub backoff: f64,
    /// Upper bound for the delay
    pub max_interval_ms: u64,
    /// Give up after this long; None waits forever
    pub timeout_ms: Option<u64>,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            backoff: 1.0,
            max_interval_ms: 1_000,
            timeout_ms: Some(30_000),
        }
    }
}

impl ReadinessPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Delay to use after `current`
    pub fn next_interval(&self, current: Duration) -> Duration {
        let factor = if self.backoff.is_finite() && self.backoff >= 1.0 {
            self.backoff
        } else {
            1.0
        };
        let max = Duration::from_millis(self.max_interval_ms.max(self.poll_interval_ms));
        current.mul_f64(factor).min(max)
    }
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Segment has no frames")]
    SegmentEmpty,

    #[error("Export preparation failed: {0}")]
    PreparationFailed(String),

    #[error("Timed out after {waited:?} waiting for segment frames")]
    Timeout { waited: Duration },

    #[error("Muxer error: {0}")]
    Muxer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&VideoQuality::Ultra).unwrap(), "\"ultra\"");
        assert_eq!(serde_json::to_string(&ContainerFormat::Mov).unwrap(), "\"mov\"");
        let codec: VideoCodec = serde_json::from_str("\"hevc\"").unwrap();
        assert_eq!(codec, VideoCodec::Hevc);
    }

    #[test]
    fn test_encoder_selection() {
        assert_eq!(VideoCodec::Preferred.ffmpeg_encoder(ContainerFormat::Mp4), "libx264");
        assert_eq!(VideoCodec::Preferred.ffmpeg_encoder(ContainerFormat::Mov), "libx265");
        assert_eq!(VideoCodec::H264.ffmpeg_encoder(ContainerFormat::Mov), "libx264");
    }

    #[test]
    fn test_readiness_backoff() {
        let fixed = ReadinessPolicy::default();
        assert_eq!(fixed.next_interval(fixed.poll_interval()), Duration::from_millis(100));

        let growing = ReadinessPolicy {
            backoff: 2.0,
            max_interval_ms: 300,
            ..ReadinessPolicy::default()
        };
        let second = growing.next_interval(growing.poll_interval());
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(growing.next_interval(second), Duration::from_millis(300));
    }

    #[test]
    fn test_readiness_policy_from_partial_json() {
        let policy: ReadinessPolicy = serde_json::from_str(r#"{"timeoutMs": null}"#).unwrap();
        assert_eq!(policy.timeout(), None);
        assert_eq!(policy.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3.000000\n"), Some(3.0));
        assert_eq!(parse_duration("N/A"), None);
    }
}
