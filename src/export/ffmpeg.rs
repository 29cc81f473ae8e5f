//! FFmpeg muxer backend
//!
//! Each session is an `ffmpeg` child process reading raw RGBA frames on
//! stdin. Frames are handed to a writer thread through a bounded channel;
//! the channel's free capacity is the session's backpressure signal.

use super::muxer::{Muxer, MuxerSession, Rotation, SessionSettings};
use super::types::{ContainerFormat, ExportError, VideoCodec};
use crate::capture::RawFrame;
use parking_lot::Mutex;
use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

/// Frames queued ahead of the encoder before the session reports "not ready"
const QUEUE_DEPTH: usize = 8;

/// Muxer that shells out to FFmpeg
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    binary: String,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific ffmpeg executable
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Muxer for FfmpegMuxer {
    fn open(&self, settings: &SessionSettings) -> Result<Box<dyn MuxerSession>, ExportError> {
        let args = build_args(settings);
        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ExportError::PreparationFailed(format!("Failed to start FFmpeg encoder: {}", e))
            })?;

        let stdin = process.stdin.take().ok_or_else(|| {
            ExportError::PreparationFailed("Failed to capture FFmpeg stdin".to_string())
        })?;

        let (frames, rx) = mpsc::channel(QUEUE_DEPTH);
        let error = Arc::new(Mutex::new(None));
        let writer = spawn_writer(stdin, rx, error.clone()).map_err(|e| {
            let _ = process.kill();
            ExportError::PreparationFailed(format!("Failed to spawn frame writer: {}", e))
        })?;

        Ok(Box::new(FfmpegSession {
            process: Some(process),
            frames: Some(frames),
            writer: Some(writer),
            error,
            frame_len: (settings.width as usize) * (settings.height as usize) * 4,
            last_pts: None,
            frame_count: 0,
        }))
    }
}

fn spawn_writer(
    mut stdin: ChildStdin,
    mut rx: mpsc::Receiver<RawFrame>,
    error: Arc<Mutex<Option<String>>>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ffmpeg-writer".to_string())
        .spawn(move || {
            while let Some(frame) = rx.blocking_recv() {
                if let Err(e) = stdin.write_all(&frame.data) {
                    tracing::error!("Failed to write frame to FFmpeg: {}", e);
                    *error.lock() = Some(format!("Failed to write frame: {}", e));
                    break;
                }
            }
            // Dropping stdin signals EOF to FFmpeg
        })
}

struct FfmpegSession {
    process: Option<Child>,
    frames: Option<mpsc::Sender<RawFrame>>,
    writer: Option<JoinHandle<()>>,
    error: Arc<Mutex<Option<String>>>,
    frame_len: usize,
    last_pts: Option<Duration>,
    frame_count: u64,
}

impl MuxerSession for FfmpegSession {
    fn is_ready_for_more_data(&self) -> bool {
        self.error.lock().is_none()
            && self
                .frames
                .as_ref()
                .map(|tx| tx.capacity() > 0)
                .unwrap_or(false)
    }

    fn append(&mut self, frame: &RawFrame, pts: Duration) -> Result<(), ExportError> {
        if let Some(message) = self.error() {
            return Err(ExportError::Muxer(message));
        }
        if frame.data.len() != self.frame_len {
            return Err(ExportError::Muxer(format!(
                "Frame is {} bytes, session expects {}",
                frame.data.len(),
                self.frame_len
            )));
        }
        if self.last_pts.is_some_and(|last| pts <= last) {
            return Err(ExportError::Muxer(format!(
                "Presentation time {:?} is not after {:?}",
                pts, self.last_pts
            )));
        }

        let tx = self
            .frames
            .as_ref()
            .ok_or_else(|| ExportError::Muxer("Session input already closed".to_string()))?;
        tx.try_send(frame.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ExportError::Muxer("Frame appended while encoder was not ready".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ExportError::Muxer("FFmpeg writer has stopped".to_string())
            }
        })?;

        self.last_pts = Some(pts);
        self.frame_count += 1;
        Ok(())
    }

    fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    fn finish(mut self: Box<Self>) -> Result<(), ExportError> {
        // Close the queue, let the writer drain and drop stdin
        self.frames.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                return Err(ExportError::Muxer("FFmpeg writer thread panicked".to_string()));
            }
        }

        let process = self
            .process
            .take()
            .ok_or_else(|| ExportError::Muxer("FFmpeg process already reaped".to_string()))?;
        let output = process
            .wait_with_output()
            .map_err(|e| ExportError::Muxer(format!("Failed to wait for FFmpeg: {}", e)))?;

        if let Some(message) = self.error.lock().take() {
            // The write usually failed because FFmpeg quit; its stderr says why
            return Err(ExportError::Muxer(with_diagnostics(message, &output.stderr)));
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExportError::Muxer(format!("FFmpeg exited with error: {}", stderr)));
        }

        tracing::info!("FFmpeg encoder finished: {} frames written", self.frame_count);
        Ok(())
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        // Still set only when finish() was never reached: abandon the output
        if let Some(mut process) = self.process.take() {
            self.frames.take();
            let _ = process.kill();
            match process.wait_with_output() {
                Ok(output) => {
                    if let Some(message) = self.error.lock().take() {
                        tracing::warn!(
                            "Abandoned FFmpeg session: {}",
                            with_diagnostics(message, &output.stderr)
                        );
                    }
                }
                Err(e) => tracing::warn!("Failed to reap FFmpeg: {}", e),
            }
        }
    }
}

/// Append FFmpeg's own stderr output to `message`, if it printed any
fn with_diagnostics(message: String, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        message
    } else {
        format!("{} (FFmpeg: {})", message, stderr)
    }
}

/// Command line for a session
fn build_args(settings: &SessionSettings) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", settings.width, settings.height),
        "-r".to_string(),
        format!("{:.6}", settings.frame_rate),
        "-i".to_string(),
        "-".to_string(),
        "-vf".to_string(),
        video_filter(settings),
    ];

    let encoder = settings.codec.ffmpeg_encoder(settings.container);
    args.extend([
        "-c:v".to_string(),
        encoder.to_string(),
        "-preset".to_string(),
        settings.quality.preset().to_string(),
        "-crf".to_string(),
        settings.quality.crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);

    if encoder == VideoCodec::Hevc.ffmpeg_encoder(settings.container)
        && settings.container == ContainerFormat::Mov
    {
        // Players expect hvc1 tagging for HEVC in QuickTime files
        args.extend(["-tag:v".to_string(), "hvc1".to_string()]);
    }

    args.extend([
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        settings.container.extension().to_string(),
    ]);

    args.push(settings.output_path.to_string_lossy().into_owned());
    args
}

/// Rotation first, then fit into the quality preset's frame
fn video_filter(settings: &SessionSettings) -> String {
    let (w, h) = settings.quality.dimensions();
    let (out_w, out_h) = match settings.rotation {
        Rotation::None => (w, h),
        Rotation::Clockwise90 => (h, w),
    };

    let scale = format!(
        "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2:black",
        out_w, out_h, out_w, out_h
    );

    match settings.rotation {
        Rotation::None => scale,
        Rotation::Clockwise90 => format!("transpose=1,{}", scale),
    }
}
