//! Immutable snapshot of buffer contents

use super::frame_store::read_frame;
use super::record::FrameRecord;
use crate::capture::RawFrame;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// Frames captured at one trigger, in ascending timestamp order
#[derive(Debug, Clone)]
pub struct Segment {
    index: usize,
    frames: Arc<[FrameRecord]>,
    created_at: DateTime<Utc>,
}

impl Segment {
    /// `created_at` is the capture instant on the buffer's clock
    pub fn new(index: usize, frames: Vec<FrameRecord>, created_at: DateTime<Utc>) -> Self {
        Self {
            index,
            frames: frames.into(),
            created_at,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn frame_paths(&self) -> impl Iterator<Item = &Path> + '_ {
        self.frames.iter().map(FrameRecord::path)
    }

    /// True when none of the segment's frames is still being written
    pub fn is_ready(&self) -> bool {
        self.frames.iter().all(FrameRecord::is_settled)
    }

    /// Decode the frame at `index`; None past the end or if the file is gone
    pub fn frame(&self, index: usize) -> Option<RawFrame> {
        self.frames.get(index).and_then(|record| read_frame(record.path()))
    }

    /// Decode every readable frame
    pub fn frames(&self) -> Vec<RawFrame> {
        self.frames
            .iter()
            .filter_map(|record| read_frame(record.path()))
            .collect()
    }
}
