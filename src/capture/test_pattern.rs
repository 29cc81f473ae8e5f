//! Synthetic capture source
//!
//! Produces a moving colour-bar pattern on a background thread at the
//! configured frame rate. Used by the demo binary and by tests that
//! need a live producer without a camera.

use super::traits::{CaptureError, CaptureSource, PreviewSurface, RawFrame};
use crate::recorder::config::RecorderConfiguration;
use crate::recorder::sink::FrameSink;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BARS: [[u8; 4]; 7] = [
    [192, 192, 192, 255],
    [192, 192, 0, 255],
    [0, 192, 192, 255],
    [0, 192, 0, 255],
    [192, 0, 192, 255],
    [192, 0, 0, 255],
    [0, 0, 192, 255],
];

/// Colour-bar generator
pub struct TestPatternSource {
    id: String,
    width: u32,
    height: u32,
    fps: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    frames_produced: Arc<AtomicU64>,
    preview: Arc<Mutex<Option<Box<dyn PreviewSurface>>>>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            id: "test-pattern".to_string(),
            width,
            height,
            fps: Arc::new(AtomicU32::new(30)),
            running: Arc::new(AtomicBool::new(false)),
            frames_produced: Arc::new(AtomicU64::new(0)),
            preview: Arc::new(Mutex::new(None)),
            capture_thread: None,
        }
    }

    /// Number of frames pushed so far
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }

    /// Render frame `n` of the pattern; bars scroll one column per frame
    pub fn render_frame(width: u32, height: u32, n: u64) -> RawFrame {
        let mut data = Vec::with_capacity((width as usize) * (height as usize) * 4);
        let bar_width = (width as usize / BARS.len()).max(1);
        for _y in 0..height {
            for x in 0..width as usize {
                let shifted = (x + n as usize) % (bar_width * BARS.len());
                data.extend_from_slice(&BARS[(shifted / bar_width).min(BARS.len() - 1)]);
            }
        }
        RawFrame::new(width, height, data)
    }
}

impl CaptureSource for TestPatternSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn configure(&mut self, config: &RecorderConfiguration) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Configuration(format!(
                "Test pattern cannot render {}x{} frames",
                self.width, self.height
            )));
        }

        self.fps.store(config.framerate.fps(), Ordering::Relaxed);
        tracing::info!(
            "Test pattern configured: {}x{} @ {}fps (requested quality {:?})",
            self.width,
            self.height,
            config.framerate.fps(),
            config.quality
        );
        Ok(())
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }

        let running = self.running.clone();
        let fps = self.fps.clone();
        let frames_produced = self.frames_produced.clone();
        let preview = self.preview.clone();
        let (width, height) = (self.width, self.height);

        let spawned = std::thread::Builder::new()
            .name("test-pattern".to_string())
            .spawn(move || {
                let mut n: u64 = 0;
                let mut next_frame = Instant::now();

                while running.load(Ordering::SeqCst) {
                    let frame = Self::render_frame(width, height, n);

                    if let Some(surface) = preview.lock().as_mut() {
                        surface.render(&frame);
                    }

                    sink.push(Utc::now(), frame);
                    frames_produced.fetch_add(1, Ordering::Relaxed);
                    n += 1;

                    let rate = fps.load(Ordering::Relaxed).max(1);
                    let interval = Duration::from_secs_f64(1.0 / rate as f64);
                    next_frame += interval;
                    let now = Instant::now();
                    if next_frame > now {
                        std::thread::sleep(next_frame - now);
                    } else {
                        // Fell behind; don't try to catch up in a burst
                        next_frame = now;
                    }
                }

                tracing::info!("Test pattern thread stopped after {} frames", n);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(CaptureError::Io(e));
            }
        };
        self.capture_thread = Some(handle);
        tracing::info!("Test pattern capture started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
    }

    fn attach_preview(&mut self, surface: Box<dyn PreviewSurface>) {
        *self.preview.lock() = Some(surface);
    }

    fn detach_preview(&mut self) {
        self.preview.lock().take();
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.stop();
    }
}
