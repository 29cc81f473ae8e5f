//! Rolling frame buffer
//!
//! Keeps the last `window` of frames on disk, bounded to `capacity`
//! records, while frames that went into a segment stay protected until
//! the buffer is released.
//!
//! All mutations of the tracked/captured sets, and the sorted snapshot
//! taken by [`RollingFrameBuffer::capture`], happen under one write lock.
//! Size and readiness queries take the read lock.

use super::clock::{Clock, SystemClock};
use super::frame_store::FrameStore;
use super::record::{FrameRecord, WritePhase};
use super::segment::Segment;
use crate::capture::RawFrame;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct BufferState {
    /// Insertion order
    tracked: Vec<FrameRecord>,
    /// Paths in `tracked`, for dedup and membership checks
    tracked_paths: HashSet<PathBuf>,
    /// Protected records
    captured: HashSet<FrameRecord>,
}

/// Time-windowed, disk-backed ring of frames
pub struct RollingFrameBuffer {
    window: Duration,
    capacity: usize,
    store: FrameStore,
    clock: Arc<dyn Clock>,
    state: RwLock<BufferState>,
}

impl RollingFrameBuffer {
    /// Buffer holding `window` seconds at `framerate`, writing into `directory`
    pub fn new(window: Duration, framerate: u32, directory: PathBuf) -> Self {
        Self::with_clock(window, framerate, directory, Arc::new(SystemClock))
    }

    pub fn with_clock(
        window: Duration,
        framerate: u32,
        directory: PathBuf,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = Self::capacity_for(window, framerate);
        tracing::info!(
            "Rolling buffer at {:?}: window {:.2}s, capacity {} frames",
            directory,
            window.as_secs_f64(),
            capacity
        );
        Self {
            window,
            capacity,
            store: FrameStore::new(directory),
            clock,
            state: RwLock::new(BufferState::default()),
        }
    }

    /// `ceil(window_seconds * fps)`
    pub fn capacity_for(window: Duration, framerate: u32) -> usize {
        (window.as_secs_f64() * framerate as f64).ceil() as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn directory(&self) -> &Path {
        self.store.directory()
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    /// Track a new frame and schedule its write
    pub fn insert(&self, timestamp: DateTime<Utc>, frame: RawFrame) {
        let record = self.store.allocate(timestamp);

        {
            let mut state = self.state.write();
            if !state.tracked_paths.insert(record.path().to_path_buf()) {
                tracing::debug!("Frame path {:?} already tracked, skipping", record.path());
                return;
            }
            state.tracked.push(record.clone());
        }

        self.store.write(record, frame);

        self.evict();
        self.validate();
    }

    /// Snapshot the current window into a segment and protect its frames.
    ///
    /// Frames are ordered by timestamp. Frames sharing a timestamp keep
    /// their insertion order, which is the order of their path sequence.
    pub fn capture(&self, index: usize) -> Segment {
        let now = self.clock.now();
        let cutoff = self.cutoff_at(now);

        let frames = {
            let mut state = self.state.write();
            let mut sorted = state.tracked.clone();
            // Paths are zero-padded sequence numbers, so they order by insertion
            sorted.sort_by(|a, b| {
                a.timestamp()
                    .cmp(&b.timestamp())
                    .then_with(|| a.path().cmp(b.path()))
            });

            let selected: Vec<FrameRecord> = sorted
                .into_iter()
                .filter(|record| record.timestamp() >= cutoff)
                .collect();

            for record in &selected {
                state.captured.insert(record.clone());
            }
            selected
        };

        tracing::info!(
            "Captured segment {} with {} frames (cutoff {})",
            index,
            frames.len(),
            cutoff
        );

        self.evict();
        self.validate();

        Segment::new(index, frames, now)
    }

    /// Drop unprotected frames older than the window, if over capacity.
    /// Returns the number of records evicted.
    pub fn evict(&self) -> usize {
        let cutoff = self.cutoff();

        let evicted = {
            let mut state = self.state.write();
            if state.tracked.len() <= self.capacity {
                return 0;
            }

            let BufferState {
                tracked,
                tracked_paths,
                captured,
            } = &mut *state;

            let mut evicted = Vec::new();
            tracked.retain(|record| {
                if captured.contains(record) || record.timestamp() >= cutoff {
                    return true;
                }
                tracked_paths.remove(record.path());
                evicted.push(record.clone());
                false
            });
            evicted
        };

        for record in &evicted {
            // A pending write cleans up after itself once it sees Discarded
            if record.discard() != WritePhase::Pending {
                self.store.delete(record.path());
            }
        }

        if !evicted.is_empty() {
            tracing::debug!("Evicted {} frames older than {}", evicted.len(), cutoff);
        }
        evicted.len()
    }

    /// Check that every protected record is still tracked.
    /// Returns the number of protected records that went missing.
    pub fn validate(&self) -> usize {
        let state = self.state.read();
        let missing = state
            .captured
            .iter()
            .filter(|record| !state.tracked_paths.contains(record.path()))
            .count();

        if missing > 0 {
            tracing::error!(
                "{} captured frames are no longer tracked; a capture raced an eviction",
                missing
            );
        }
        missing
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().tracked.is_empty()
    }

    /// Number of tracked records
    pub fn len(&self) -> usize {
        self.state.read().tracked.len()
    }

    /// Number of protected records
    pub fn captured_len(&self) -> usize {
        self.state.read().captured.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.state.read().tracked_paths.contains(path)
    }

    /// True when no tracked frame is still waiting for its write
    pub fn is_ready(&self) -> bool {
        self.state.read().tracked.iter().all(FrameRecord::is_settled)
    }

    /// Entries actually present in the buffer directory
    pub fn files_on_disk(&self) -> usize {
        self.store.files_on_disk()
    }

    /// Forget every frame and delete the backing directory
    pub fn release(&self) {
        let released = {
            let mut state = self.state.write();
            state.captured.clear();
            state.tracked_paths.clear();
            std::mem::take(&mut state.tracked)
        };

        for record in &released {
            record.discard();
        }

        // Let in-flight writes observe the discard before the directory goes
        self.store.flush();
        self.store.delete_directory();

        tracing::info!(
            "Released rolling buffer {:?} ({} frames)",
            self.store.directory(),
            released.len()
        );
    }

    fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff_at(self.clock.now())
    }

    fn cutoff_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window =
            chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::zero());
        now - window
    }
}
