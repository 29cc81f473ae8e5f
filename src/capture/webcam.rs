//! Webcam capture using nokhwa
//!
//! Frames are decoded to RGBA on the capture thread and pushed to the
//! recorder sink with the wall-clock time they were received.

use super::traits::{CaptureError, CaptureSource, PreviewSurface, RawFrame};
use crate::recorder::config::RecorderConfiguration;
use crate::recorder::sink::FrameSink;
use chrono::Utc;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Camera-backed capture source
pub struct WebcamSource {
    id: String,
    device_id: Option<String>,
    width: u32,
    height: u32,
    fps: u32,
    running: Arc<AtomicBool>,
    preview: Arc<Mutex<Option<Box<dyn PreviewSurface>>>>,
    sink: Option<FrameSink>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
}

impl WebcamSource {
    /// Create a source for the given device (None = first camera)
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            id: "webcam".to_string(),
            device_id,
            width: 1280,
            height: 720,
            fps: 30,
            running: Arc::new(AtomicBool::new(false)),
            preview: Arc::new(Mutex::new(None)),
            sink: None,
            capture_thread: None,
        }
    }

    fn camera_index(&self) -> CameraIndex {
        match &self.device_id {
            Some(id) => {
                if let Ok(idx) = id.parse::<u32>() {
                    CameraIndex::Index(idx)
                } else {
                    CameraIndex::String(id.clone())
                }
            }
            None => CameraIndex::Index(0),
        }
    }
}

impl CaptureSource for WebcamSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn configure(&mut self, config: &RecorderConfiguration) -> Result<(), CaptureError> {
        let cameras = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| CaptureError::DeviceNotFound(format!("{:?}", e)))?;
        if cameras.is_empty() {
            return Err(CaptureError::DeviceNotFound("No cameras found".to_string()));
        }

        let (width, height) = config.quality.dimensions();
        self.width = width;
        self.height = height;
        self.fps = config.framerate.fps();

        // The stream negotiates its format when it opens
        if self.running.load(Ordering::SeqCst) {
            if let Some(sink) = self.sink.clone() {
                tracing::info!("Reopening webcam at {}x{} @ {}fps", width, height, self.fps);
                self.stop();
                self.start(sink)?;
            }
        }
        Ok(())
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }

        self.sink = Some(sink.clone());
        let camera_index = self.camera_index();
        let running = self.running.clone();
        let preview = self.preview.clone();
        let (width, height, fps) = (self.width, self.height, self.fps);

        let spawned = std::thread::Builder::new()
            .name("webcam-capture".to_string())
            .spawn(move || {
                let requested =
                    CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
                let format =
                    RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(requested));

                let mut camera = match Camera::new(camera_index.clone(), format) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::error!("Failed to open camera {:?}: {:?}", camera_index, e);
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                if let Err(e) = camera.open_stream() {
                    tracing::error!("Failed to open camera stream: {:?}", e);
                    running.store(false, Ordering::SeqCst);
                    return;
                }

                let camera_format = camera.camera_format();
                tracing::info!(
                    "Webcam opened: {}x{} @ {}fps (requested {}x{} @ {}fps)",
                    camera_format.resolution().width(),
                    camera_format.resolution().height(),
                    camera_format.frame_rate(),
                    width,
                    height,
                    fps
                );

                while running.load(Ordering::SeqCst) {
                    // Blocks until the camera delivers; the device sets the pace
                    let buffer = match camera.frame() {
                        Ok(buffer) => buffer,
                        Err(e) => {
                            tracing::debug!("Failed to capture frame: {:?}", e);
                            continue;
                        }
                    };
                    let timestamp = Utc::now();

                    let image = match buffer.decode_image::<RgbAFormat>() {
                        Ok(image) => image,
                        Err(e) => {
                            tracing::debug!("Failed to decode frame: {:?}", e);
                            continue;
                        }
                    };
                    let frame = RawFrame::new(image.width(), image.height(), image.into_raw());

                    if let Some(surface) = preview.lock().as_mut() {
                        surface.render(&frame);
                    }

                    sink.push(timestamp, frame);
                }

                if let Err(e) = camera.stop_stream() {
                    tracing::warn!("Error stopping camera stream: {:?}", e);
                }
                tracing::info!("Webcam capture thread stopped");
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(CaptureError::Io(e));
            }
        };

        self.capture_thread = Some(handle);
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

impl Drop for WebcamSource {
    fn drop(&mut self) {
        self.stop();
    }
}
