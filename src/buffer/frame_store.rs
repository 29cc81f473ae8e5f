//! Per-frame image files
//!
//! Frames are PNG-encoded and written by a dedicated writer thread so the
//! capture thread only pays for a channel send. Each record's
//! [`WritePhase`] tells readers whether its bytes have landed.

use super::record::{FrameRecord, WritePhase};
use crate::capture::RawFrame;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// File extension for stored frames
pub const FRAME_EXTENSION: &str = "png";

struct WriteJob {
    record: FrameRecord,
    frame: RawFrame,
}

/// Count of scheduled writes that have not finished
#[derive(Default)]
struct PendingWrites {
    count: Mutex<usize>,
    settled: Condvar,
}

impl PendingWrites {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.settled.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.settled.wait(&mut count);
        }
    }
}

/// Frame file storage rooted at one directory
pub struct FrameStore {
    directory: PathBuf,
    sequence: AtomicU64,
    jobs: mpsc::UnboundedSender<WriteJob>,
    pending: Arc<PendingWrites>,
}

impl FrameStore {
    /// Create a store and start its writer thread
    pub fn new(directory: PathBuf) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<WriteJob>();
        let pending = Arc::new(PendingWrites::default());

        let writer_pending = pending.clone();
        let writer_dir = directory.clone();
        let spawned = std::thread::Builder::new()
            .name("frame-writer".to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    write_job(job);
                    writer_pending.done();
                }
                tracing::debug!("Frame writer for {:?} exiting", writer_dir);
            });
        if let Err(e) = spawned {
            // Every later write fails through the closed channel
            tracing::error!("Failed to spawn frame writer: {}", e);
        }

        Self {
            directory,
            sequence: AtomicU64::new(0),
            jobs,
            pending,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Allocate a record with a fresh, unique file path
    pub fn allocate(&self, timestamp: DateTime<Utc>) -> FrameRecord {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = self
            .directory
            .join(format!("video_frame_{:010}.{}", seq, FRAME_EXTENSION));
        FrameRecord::new(timestamp, path)
    }

    /// Schedule the frame's bytes for writing; returns immediately
    pub fn write(&self, record: FrameRecord, frame: RawFrame) {
        self.pending.add();
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(WriteJob { record, frame }) {
            tracing::warn!("Frame writer is gone, dropping {:?}", job.record.path());
            job.record.mark_failed();
            self.pending.done();
        }
    }

    /// Read and decode a frame; None if the file is missing or unreadable
    pub fn read(&self, path: &Path) -> Option<RawFrame> {
        read_frame(path)
    }

    /// Remove one frame file; a missing file is fine
    pub fn delete(&self, path: &Path) {
        remove_file_quietly(path);
    }

    /// Remove the whole directory; a missing directory is fine
    pub fn delete_directory(&self) {
        match fs::remove_dir_all(&self.directory) {
            Ok(()) => tracing::debug!("Removed frame directory {:?}", self.directory),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("Failed to remove frame directory {:?}: {}", self.directory, e)
            }
        }
    }

    /// Number of entries currently in the directory
    pub fn files_on_disk(&self) -> usize {
        fs::read_dir(&self.directory)
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0)
    }

    /// Block until every scheduled write has finished
    pub fn flush(&self) {
        self.pending.wait();
    }
}

/// Decode a stored frame file; None if it is missing or unreadable
pub fn read_frame(path: &Path) -> Option<RawFrame> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to open frame {:?}: {}", path, e);
            return None;
        }
    };

    match decode_png(file) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!("Failed to decode frame {:?}: {}", path, e);
            None
        }
    }
}

fn write_job(job: WriteJob) {
    let WriteJob { record, frame } = job;

    if record.phase() == WritePhase::Discarded {
        return;
    }

    let bytes = match encode_png(&frame) {
        Ok(bytes) => bytes,
        Err(e) => {
            // Stays tracked without a file; readiness treats Failed as settled
            tracing::warn!("Failed to encode frame {:?}: {}", record.path(), e);
            record.mark_failed();
            return;
        }
    };

    if let Some(parent) = record.path().parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            tracing::warn!("Failed to create frame directory {:?}: {}", parent, e);
            record.mark_failed();
            return;
        }
    }

    if let Err(e) = fs::write(record.path(), &bytes) {
        tracing::warn!("Failed to write frame {:?}: {}", record.path(), e);
        record.mark_failed();
        return;
    }

    if !record.mark_durable() {
        // Discarded while we were writing
        remove_file_quietly(record.path());
    }
}

fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove frame {:?}: {}", path, e),
    }
}

fn encode_png(frame: &RawFrame) -> Result<Vec<u8>, png::EncodingError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, frame.width, frame.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Fast);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&frame.data)?;
        writer.finish()?;
    }
    Ok(out)
}

fn decode_png(file: fs::File) -> Result<RawFrame, String> {
    let decoder = png::Decoder::new(file);
    let mut reader = decoder
        .read_info()
        .map_err(|e| format!("PNG decode error: {}", e))?;

    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| format!("PNG frame error: {}", e))?;

    let data = match info.color_type {
        png::ColorType::Rgba => buf[..info.buffer_size()].to_vec(),
        png::ColorType::Rgb => {
            let rgb = &buf[..info.buffer_size()];
            let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
            for chunk in rgb.chunks(3) {
                rgba.extend_from_slice(chunk);
                rgba.push(255);
            }
            rgba
        }
        other => return Err(format!("Unsupported PNG color type: {:?}", other)),
    };

    Ok(RawFrame::new(info.width, info.height, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));

        let frame = RawFrame::filled(8, 6, [1, 2, 3, 255]);
        let record = store.allocate(Utc::now());
        store.write(record.clone(), frame.clone());
        store.flush();

        assert_eq!(record.phase(), WritePhase::Durable);
        assert!(record.path().exists());
        assert_eq!(store.read(record.path()), Some(frame));
        assert_eq!(store.files_on_disk(), 1);
    }

    #[test]
    fn test_paths_are_unique() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().to_path_buf());
        let now = Utc::now();
        let a = store.allocate(now);
        let b = store.allocate(now);
        assert_ne!(a, b);
    }

    #[test]
    fn test_encode_failure_is_swallowed() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));

        // Data length does not match the declared dimensions
        let record = store.allocate(Utc::now());
        store.write(record.clone(), RawFrame::new(16, 16, vec![0; 7]));
        store.flush();

        assert_eq!(record.phase(), WritePhase::Failed);
        assert!(!record.path().exists());
    }

    #[test]
    fn test_discarded_write_leaves_no_file() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("frames"));

        let record = store.allocate(Utc::now());
        record.discard();
        store.write(record.clone(), RawFrame::filled(4, 4, [0, 0, 0, 255]));
        store.flush();

        assert!(!record.path().exists());
        assert_eq!(record.phase(), WritePhase::Discarded);
    }

    #[test]
    fn test_missing_and_cleanup_are_quiet() {
        let dir = tempdir().unwrap();
        let store = FrameStore::new(dir.path().join("never-created"));

        assert!(store.read(&dir.path().join("nope.png")).is_none());
        store.delete(&dir.path().join("nope.png"));
        store.delete_directory();
        assert_eq!(store.files_on_disk(), 0);
    }
}
