//! Segment export
//!
//! Waits until every frame of a segment has been written, then decodes the
//! frames in order and feeds them to a muxer session. Presentation times
//! are spread evenly over the configured window, so an artifact always
//! plays for the window duration whatever the real capture cadence was.

use super::muxer::{Muxer, MuxerSession, Rotation, SessionSettings};
use super::types::{CapturedArtifact, ExportError, ReadinessPolicy};
use crate::buffer::Segment;
use crate::capture::RawFrame;
use crate::recorder::config::RecorderConfiguration;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Delay between backpressure checks while the muxer is busy
const BACKPRESSURE_SPIN: Duration = Duration::from_millis(1);

/// Renders segments into video files under one export directory
pub struct SegmentExporter {
    export_dir: PathBuf,
    config: RwLock<RecorderConfiguration>,
    readiness: ReadinessPolicy,
    muxer: Arc<dyn Muxer>,
}

impl SegmentExporter {
    /// Create an exporter; clears anything left in `export_dir`
    pub fn new(
        export_dir: PathBuf,
        config: RecorderConfiguration,
        readiness: ReadinessPolicy,
        muxer: Arc<dyn Muxer>,
    ) -> Self {
        let exporter = Self {
            export_dir,
            config: RwLock::new(config),
            readiness,
            muxer,
        };
        exporter.release();
        exporter
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn configuration(&self) -> RecorderConfiguration {
        self.config.read().clone()
    }

    /// Swap export parameters. Exports already running keep the settings
    /// they started with.
    pub fn update(&self, config: RecorderConfiguration) {
        let changed = {
            let mut current = self.config.write();
            let changed = *current != config;
            *current = config;
            changed
        };
        if changed {
            tracing::info!("Export configuration changed, clearing {:?}", self.export_dir);
            self.release();
        }
    }

    /// Delete the export directory; a missing directory is fine
    pub fn release(&self) {
        match fs::remove_dir_all(&self.export_dir) {
            Ok(()) => tracing::debug!("Removed export directory {:?}", self.export_dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("Failed to remove export directory {:?}: {}", self.export_dir, e)
            }
        }
    }

    /// Render `segment` into a finished artifact
    pub async fn export(&self, segment: &Segment) -> Result<CapturedArtifact, ExportError> {
        self.wait_until_ready(segment).await?;

        if segment.is_empty() {
            return Err(ExportError::SegmentEmpty);
        }

        let config = self.configuration();
        fs::create_dir_all(&self.export_dir).map_err(|e| {
            ExportError::PreparationFailed(format!(
                "Failed to create export directory {:?}: {}",
                self.export_dir, e
            ))
        })?;

        let output_path = self.export_dir.join(format!(
            "segment_{}.{}",
            segment.index(),
            config.container_format.extension()
        ));

        tracing::info!(
            "Exporting segment {} ({} frames) to {:?}",
            segment.index(),
            segment.len(),
            output_path
        );

        let muxer = self.muxer.clone();
        let segment = segment.clone();
        let path = output_path.clone();
        tokio::task::spawn_blocking(move || {
            encode_segment(&segment, &config, muxer.as_ref(), path)
        })
        .await
        .map_err(|e| ExportError::Muxer(format!("Export task failed: {}", e)))??;

        tracing::info!("Exported {:?}", output_path);
        Ok(CapturedArtifact::new(output_path))
    }

    async fn wait_until_ready(&self, segment: &Segment) -> Result<(), ExportError> {
        let started = Instant::now();
        let mut interval = self.readiness.poll_interval();

        while !segment.is_ready() {
            let waited = started.elapsed();
            if self.readiness.timeout().is_some_and(|limit| waited >= limit) {
                tracing::error!(
                    "Segment {} still has pending frames after {:?}",
                    segment.index(),
                    waited
                );
                return Err(ExportError::Timeout { waited });
            }

            tracing::debug!("Segment {} not ready, retrying in {:?}", segment.index(), interval);
            tokio::time::sleep(interval).await;
            interval = self.readiness.next_interval(interval);
        }
        Ok(())
    }
}

/// Presentation time of frame `index` when `count` frames span `window`
pub fn nominal_pts(index: usize, count: usize, window: Duration) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    window.mul_f64(index as f64 / count as f64)
}

fn encode_segment(
    segment: &Segment,
    config: &RecorderConfiguration,
    muxer: &dyn Muxer,
    output_path: PathBuf,
) -> Result<(), ExportError> {
    let size = segment.len();
    let window = config.window();

    // Dimensions come from the first frame
    let first = segment.frame(0).ok_or_else(|| {
        ExportError::PreparationFailed(format!(
            "First frame of segment {} is unreadable",
            segment.index()
        ))
    })?;

    let settings = SessionSettings {
        output_path,
        container: config.container_format,
        codec: config.codec,
        quality: config.quality,
        rotation: Rotation::Clockwise90,
        frame_rate: size as f64 / window.as_secs_f64(),
        width: first.width,
        height: first.height,
    };
    let mut session = muxer.open(&settings)?;
    let fed = feed_frames(segment, first, session.as_mut(), window);

    // Always close the session: a backend that failed mid-feed reports its
    // own diagnostics on finish, and those beat the feed-side symptom
    match (fed, session.finish()) {
        (_, Err(finish_error)) => Err(finish_error),
        (Err(feed_error), Ok(())) => Err(feed_error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn feed_frames(
    segment: &Segment,
    first: RawFrame,
    session: &mut dyn MuxerSession,
    window: Duration,
) -> Result<(), ExportError> {
    let size = segment.len();
    let mut next = Some(first);
    let mut index = 0;
    while let Some(frame) = next.take() {
        wait_for_room(session)?;
        session.append(&frame, nominal_pts(index, size, window))?;

        index += 1;
        if index < size {
            next = segment.frame(index);
            if next.is_none() {
                tracing::warn!(
                    "Frame {} of segment {} is unreadable, finishing with {} of {} frames",
                    index,
                    segment.index(),
                    index,
                    size
                );
            }
        }
    }

    match session.error() {
        Some(message) => Err(ExportError::Muxer(message)),
        None => Ok(()),
    }
}

fn wait_for_room(session: &dyn MuxerSession) -> Result<(), ExportError> {
    while !session.is_ready_for_more_data() {
        if let Some(message) = session.error() {
            return Err(ExportError::Muxer(message));
        }
        std::thread::sleep(BACKPRESSURE_SPIN);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{FrameRecord, FrameStore};
    use crate::export::muxer::testing::{MuxEvent, RecordingMuxer};
    use crate::export::types::ContainerFormat;
    use chrono::Utc;
    use tempfile::tempdir;

    fn written_segment(store: &FrameStore, index: usize, count: usize) -> Segment {
        let start = Utc::now();
        let records: Vec<FrameRecord> = (0..count)
            .map(|i| {
                let stamp = start + chrono::Duration::milliseconds(i as i64 * 33);
                let record = store.allocate(stamp);
                store.write(record.clone(), RawFrame::filled(4, 2, [i as u8, 0, 0, 255]));
                record
            })
            .collect();
        store.flush();
        Segment::new(index, records, start)
    }

    fn exporter(dir: &Path, muxer: &RecordingMuxer) -> SegmentExporter {
        SegmentExporter::new(
            dir.join("segments"),
            RecorderConfiguration::default(),
            ReadinessPolicy::default(),
            Arc::new(muxer.clone()),
        )
    }

    #[test]
    fn test_nominal_pts() {
        let window = Duration::from_secs(3);
        assert_eq!(nominal_pts(0, 90, window), Duration::ZERO);
        assert_eq!(nominal_pts(45, 90, window), Duration::from_millis(1500));
        assert_eq!(nominal_pts(0, 0, window), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_export_normalizes_duration() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));
        let muxer = RecordingMuxer::new();
        let exporter = exporter(dir.path(), &muxer);

        let segment = written_segment(&store, 0, 90);
        let artifact = exporter.export(&segment).await.unwrap();

        assert_eq!(artifact.output_path, dir.path().join("segments/segment_0.mp4"));
        assert!(artifact.output_path().exists());

        let settings = &muxer.settings()[0];
        assert_eq!(settings.rotation, Rotation::Clockwise90);
        assert_eq!((settings.width, settings.height), (4, 2));
        assert!((settings.frame_rate - 30.0).abs() < 1e-9);

        let pts = muxer.pts_for(artifact.output_path());
        assert_eq!(pts.len(), 90);
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        let last = pts[89].as_secs_f64();
        assert!((last - 89.0 * 3.0 / 90.0).abs() < 1e-6);
        // Total playback: last pts plus one frame period
        assert!((last + 1.0 / settings.frame_rate - 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_backpressure_is_honoured() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));
        let muxer = RecordingMuxer::new();
        muxer.stall_each_frame(2);
        let exporter = exporter(dir.path(), &muxer);

        let segment = written_segment(&store, 1, 5);
        let artifact = exporter.export(&segment).await.unwrap();

        assert_eq!(muxer.pts_for(artifact.output_path()).len(), 5);
        assert_eq!(muxer.stalls_seen(), 10);
    }

    #[tokio::test]
    async fn test_empty_segment() {
        let dir = tempdir().unwrap();
        let muxer = RecordingMuxer::new();
        let exporter = exporter(dir.path(), &muxer);

        let result = exporter.export(&Segment::new(0, Vec::new(), Utc::now())).await;
        assert!(matches!(result, Err(ExportError::SegmentEmpty)));
        assert!(muxer.events().is_empty());
    }

    #[tokio::test]
    async fn test_readiness_timeout() {
        let dir = tempdir().unwrap();
        let muxer = RecordingMuxer::new();
        let exporter = SegmentExporter::new(
            dir.path().join("segments"),
            RecorderConfiguration::default(),
            ReadinessPolicy {
                poll_interval_ms: 10,
                timeout_ms: Some(50),
                ..ReadinessPolicy::default()
            },
            Arc::new(muxer.clone()),
        );

        // Never written, stays pending
        let pending = FrameRecord::new(Utc::now(), dir.path().join("pending.png"));
        let result = exporter.export(&Segment::new(0, vec![pending], Utc::now())).await;

        match result {
            Err(ExportError::Timeout { waited }) => assert!(waited >= Duration::from_millis(50)),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(muxer.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_frame_finishes_early() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));
        let muxer = RecordingMuxer::new();
        let exporter = exporter(dir.path(), &muxer);

        let segment = written_segment(&store, 2, 5);
        store.delete(segment.records()[2].path());

        let artifact = exporter.export(&segment).await.unwrap();
        assert_eq!(muxer.pts_for(artifact.output_path()).len(), 2);
        assert_eq!(
            muxer.events().last(),
            Some(&MuxEvent::Finished(artifact.output_path().to_path_buf()))
        );
    }

    #[tokio::test]
    async fn test_unreadable_first_frame() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));
        let muxer = RecordingMuxer::new();
        let exporter = exporter(dir.path(), &muxer);

        let segment = written_segment(&store, 0, 3);
        store.delete(segment.records()[0].path());

        let result = exporter.export(&segment).await;
        assert!(matches!(result, Err(ExportError::PreparationFailed(_))));
    }

    #[tokio::test]
    async fn test_muxer_error_propagates() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));
        let muxer = RecordingMuxer::new();
        muxer.fail_finish_with("disk full");
        let exporter = exporter(dir.path(), &muxer);

        let segment = written_segment(&store, 0, 3);
        match exporter.export(&segment).await {
            Err(ExportError::Muxer(message)) => assert_eq!(message, "disk full"),
            other => panic!("expected muxer error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_feed_failure_still_finishes_session() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));
        let muxer = RecordingMuxer::new();
        muxer.fail_append_number(1, "Broken pipe");
        let exporter = exporter(dir.path(), &muxer);

        let segment = written_segment(&store, 0, 3);
        match exporter.export(&segment).await {
            Err(ExportError::Muxer(message)) => assert_eq!(message, "Broken pipe"),
            other => panic!("expected muxer error, got {:?}", other),
        }
        assert!(matches!(muxer.events().last(), Some(MuxEvent::Finished(_))));

        // When the backend explains itself on finish, that explanation wins
        muxer.fail_finish_with("Unknown encoder 'libx265'");
        let segment = written_segment(&store, 1, 3);
        match exporter.export(&segment).await {
            Err(ExportError::Muxer(message)) => assert_eq!(message, "Unknown encoder 'libx265'"),
            other => panic!("expected muxer error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_switches_container_and_clears() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));
        let muxer = RecordingMuxer::new();
        let exporter = exporter(dir.path(), &muxer);

        let segment = written_segment(&store, 0, 3);
        let first = exporter.export(&segment).await.unwrap();
        assert!(first.output_path().exists());

        exporter.update(RecorderConfiguration {
            container_format: ContainerFormat::Mov,
            ..RecorderConfiguration::default()
        });
        assert!(!first.output_path().exists());

        let second = exporter.export(&segment).await.unwrap();
        assert_eq!(second.output_path().extension().unwrap(), "mov");
    }

    #[test]
    fn test_construction_clears_directory() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("segments/segment_9.mp4");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"old").unwrap();

        let _exporter = exporter(dir.path(), &RecordingMuxer::new());
        assert!(!stale.exists());
    }
}
