//! Recorder configuration
//!
//! `RecorderConfiguration` is the immutable value the recorder rebuilds its
//! buffer and exporter from. `AppConfig` bundles it with storage and
//! readiness settings and is what the binary loads from disk.

use crate::export::types::{ContainerFormat, ReadinessPolicy, VideoCodec, VideoQuality};
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Supported capture frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Framerate {
    Fps24,
    #[default]
    Fps30,
    Fps60,
}

impl Framerate {
    pub fn fps(&self) -> u32 {
        match self {
            Framerate::Fps24 => 24,
            Framerate::Fps30 => 30,
            Framerate::Fps60 => 60,
        }
    }
}

impl TryFrom<u32> for Framerate {
    type Error = String;

    fn try_from(fps: u32) -> Result<Self, Self::Error> {
        match fps {
            24 => Ok(Framerate::Fps24),
            30 => Ok(Framerate::Fps30),
            60 => Ok(Framerate::Fps60),
            other => Err(format!("unsupported framerate {} (expected 24, 30 or 60)", other)),
        }
    }
}

impl From<Framerate> for u32 {
    fn from(framerate: Framerate) -> u32 {
        framerate.fps()
    }
}

/// Capture and export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfiguration {
    pub quality: VideoQuality,
    pub codec: VideoCodec,
    pub container_format: ContainerFormat,
    pub framerate: Framerate,
    /// Lookback window in seconds
    pub window_duration: f64,
}

impl Default for RecorderConfiguration {
    fn default() -> Self {
        Self {
            quality: VideoQuality::Medium,
            codec: VideoCodec::Preferred,
            container_format: ContainerFormat::Mp4,
            framerate: Framerate::Fps30,
            window_duration: 3.0,
        }
    }
}

impl RecorderConfiguration {
    /// Lookback window; zero if the configured value is unusable
    pub fn window(&self) -> Duration {
        Duration::try_from_secs_f64(self.window_duration).unwrap_or(Duration::ZERO)
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if !self.window_duration.is_finite() || self.window_duration <= 0.0 {
            return Err(RecorderError::Config(format!(
                "windowDuration must be a positive number of seconds, got {}",
                self.window_duration
            )));
        }
        Ok(())
    }
}

/// Where frames and exported segments live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageLayout {
    pub frames_dir: PathBuf,
    pub exports_dir: PathBuf,
}

impl Default for StorageLayout {
    fn default() -> Self {
        let root = std::env::temp_dir().join("event-recorder");
        Self {
            frames_dir: root.join("frames"),
            exports_dir: root.join("segments"),
        }
    }
}

impl StorageLayout {
    /// Rooted under one directory
    pub fn under(root: &Path) -> Self {
        Self {
            frames_dir: root.join("frames"),
            exports_dir: root.join("segments"),
        }
    }

    /// Fresh directory for one rolling buffer
    pub fn buffer_dir(&self) -> PathBuf {
        self.frames_dir.join(Uuid::new_v4().to_string())
    }
}

/// Application configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub recorder: RecorderConfiguration,
    pub storage: StorageLayout,
    pub readiness: ReadinessPolicy,
}

impl AppConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> RecorderResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        config.recorder.validate()?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> RecorderResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RecorderConfiguration::default();
        assert_eq!(config.framerate.fps(), 30);
        assert_eq!(config.window(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_framerate_rejects_unsupported() {
        let ok: RecorderConfiguration = serde_json::from_str(r#"{"framerate": 60}"#).unwrap();
        assert_eq!(ok.framerate, Framerate::Fps60);

        let bad = serde_json::from_str::<RecorderConfiguration>(r#"{"framerate": 25}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_window_validation() {
        let config = RecorderConfiguration {
            window_duration: 0.0,
            ..RecorderConfiguration::default()
        };
        assert!(matches!(config.validate(), Err(RecorderError::Config(_))));

        let config = RecorderConfiguration {
            window_duration: f64::NAN,
            ..RecorderConfiguration::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.window(), Duration::ZERO);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "recorder": { "quality": "high", "containerFormat": "mov", "windowDuration": 5.0 },
                "readiness": { "timeoutMs": 1000 }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.recorder.quality, VideoQuality::High);
        assert_eq!(config.recorder.container_format, ContainerFormat::Mov);
        assert_eq!(config.recorder.framerate, Framerate::Fps30);
        assert_eq!(config.readiness.timeout(), Some(Duration::from_secs(1)));
        assert_eq!(config.storage, StorageLayout::default());
    }

    #[test]
    fn test_load_rejects_bad_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "recorder": { "windowDuration": -1 } }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(RecorderError::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let config = AppConfig {
            storage: StorageLayout::under(dir.path()),
            ..AppConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_buffer_dirs_are_distinct() {
        let layout = StorageLayout::under(Path::new("/data"));
        let a = layout.buffer_dir();
        let b = layout.buffer_dir();
        assert_ne!(a, b);
        assert!(a.starts_with("/data/frames"));
    }
}
