//! Recorder state machine
//!
//! Owns the rolling buffer, the exporter and the list of captured
//! segments, and drives the capture source. Control commands take
//! `&mut self` and are expected to come from one owning context; frames
//! arrive concurrently through the [`FrameSink`].

use super::config::{AppConfig, RecorderConfiguration, StorageLayout};
use super::sink::FrameSink;
use super::state::{RecorderState, StateObserver};
use crate::buffer::{RollingFrameBuffer, Segment};
use crate::capture::{CaptureSource, PreviewSurface};
use crate::export::{CapturedArtifact, Muxer, ReadinessPolicy, SegmentExporter};
use crate::utils::error::{RecorderError, RecorderResult};
use std::sync::Arc;

/// Event recorder
pub struct Recorder {
    config: RecorderConfiguration,
    layout: StorageLayout,
    readiness: ReadinessPolicy,

    sink: FrameSink,
    source: Box<dyn CaptureSource>,
    source_started: bool,

    muxer: Arc<dyn Muxer>,
    exporter: Arc<SegmentExporter>,
    segments: Vec<Segment>,

    observer: Option<StateObserver>,
}

impl Recorder {
    /// Build a recorder and bring up the capture source with `app.recorder`
    pub fn new(
        app: AppConfig,
        source: Box<dyn CaptureSource>,
        muxer: Arc<dyn Muxer>,
    ) -> RecorderResult<Self> {
        let AppConfig {
            recorder,
            storage,
            readiness,
        } = app;
        recorder.validate()?;

        let exporter = Arc::new(SegmentExporter::new(
            storage.exports_dir.clone(),
            recorder.clone(),
            readiness.clone(),
            muxer.clone(),
        ));

        let mut this = Self {
            config: recorder.clone(),
            layout: storage,
            readiness,
            sink: FrameSink::new(),
            source,
            source_started: false,
            muxer,
            exporter,
            segments: Vec::new(),
            observer: None,
        };
        this.change_configuration(recorder)?;
        Ok(this)
    }

    pub fn state(&self) -> RecorderState {
        self.sink.state()
    }

    pub fn configuration(&self) -> &RecorderConfiguration {
        &self.config
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The current rolling buffer, if one is allocated
    pub fn buffer(&self) -> Option<Arc<RollingFrameBuffer>> {
        self.sink.buffer()
    }

    /// Handle frames are delivered through
    pub fn sink(&self) -> &FrameSink {
        &self.sink
    }

    pub fn set_state_observer<F>(&mut self, observer: F)
    where
        F: Fn(RecorderState, RecorderState) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn clear_state_observer(&mut self) {
        self.observer = None;
    }

    /// Start buffering into a fresh rolling buffer
    pub fn start(&mut self) -> RecorderResult<()> {
        if self.state() == RecorderState::Recording {
            return Err(RecorderError::AlreadyRunning);
        }

        self.stop();

        let buffer = self.make_buffer();
        tracing::info!("Recording into {:?}", buffer.directory());
        self.sink.replace_buffer(Some(buffer));

        self.transition(RecorderState::Recording);
        Ok(())
    }

    /// Release the buffer and export directory, drop pending segments
    pub fn stop(&mut self) {
        self.release_buffer();
        self.exporter.release();
        self.segments.clear();
        self.transition(RecorderState::Idle);
    }

    /// Like `stop`; kept as the name outer surfaces use for a full teardown
    pub fn reset(&mut self) {
        tracing::info!("Resetting recorder");
        self.stop();
    }

    pub fn pause(&mut self) {
        if self.state() == RecorderState::Recording {
            self.transition(RecorderState::Paused);
        }
    }

    pub fn resume(&mut self) {
        if self.state() == RecorderState::Paused {
            self.transition(RecorderState::Recording);
        }
    }

    /// Freeze the current window into a new segment
    pub fn capture_segment(&mut self) -> RecorderResult<&Segment> {
        if self.state() != RecorderState::Recording {
            return Err(RecorderError::NotRunning);
        }

        let buffer = self
            .sink
            .buffer()
            .filter(|buffer| !buffer.is_empty())
            .ok_or(RecorderError::CorruptedBuffer)?;

        let segment = buffer.capture(self.segments.len());
        self.segments.push(segment);
        Ok(&self.segments[self.segments.len() - 1])
    }

    /// Rebuild buffer and exporter for `config` and reconfigure capture
    pub fn change_configuration(&mut self, config: RecorderConfiguration) -> RecorderResult<()> {
        if self.state() == RecorderState::Recording {
            return Err(RecorderError::RuntimeConfigChange);
        }
        config.validate()?;

        tracing::info!("Applying configuration: {:?}", config);

        self.exporter = Arc::new(SegmentExporter::new(
            self.layout.exports_dir.clone(),
            config.clone(),
            self.readiness.clone(),
            self.muxer.clone(),
        ));

        if !self.segments.is_empty() {
            tracing::warn!(
                "Dropping {} unexported segments on configuration change",
                self.segments.len()
            );
            self.segments.clear();
        }

        self.config = config;
        self.release_buffer();
        self.sink.replace_buffer(Some(self.make_buffer()));

        self.source.configure(&self.config)?;
        if !self.source_started {
            self.source.start(self.sink.clone())?;
            self.source_started = true;
            tracing::info!("Capture source {} started", self.source.id());
        }
        Ok(())
    }

    /// Hand a preview surface to the capture source
    pub fn setup_preview(&mut self, surface: Box<dyn PreviewSurface>) {
        self.source.attach_preview(surface);
    }

    pub fn remove_preview(&mut self) {
        self.source.detach_preview();
    }

    /// Export every captured segment, one at a time, in capture order.
    ///
    /// All segments are attempted; the first failure is what gets reported.
    pub async fn export_all(&self) -> RecorderResult<Vec<CapturedArtifact>> {
        let exporter = self.exporter.clone();
        let segments = self.segments.clone();

        let mut artifacts = Vec::with_capacity(segments.len());
        let mut failure = None;

        for segment in &segments {
            match exporter.export(segment).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    tracing::error!("Export of segment {} failed: {}", segment.index(), e);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e.into()),
            None => {
                tracing::info!("Exported {} segments", artifacts.len());
                Ok(artifacts)
            }
        }
    }

    fn make_buffer(&self) -> Arc<RollingFrameBuffer> {
        Arc::new(RollingFrameBuffer::new(
            self.config.window(),
            self.config.framerate.fps(),
            self.layout.buffer_dir(),
        ))
    }

    fn release_buffer(&self) {
        if let Some(buffer) = self.sink.replace_buffer(None) {
            buffer.release();
        }
    }

    fn transition(&self, new: RecorderState) {
        let old = self.sink.set_state(new);
        if old == new {
            return;
        }
        tracing::info!("Recorder state {:?} -> {:?}", old, new);
        if let Some(observer) = &self.observer {
            observer(old, new);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.source_started {
            self.source.stop();
        }
        self.release_buffer();
    }
}
