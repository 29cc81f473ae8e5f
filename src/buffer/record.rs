//! Frame records and their write phase

use chrono::{DateTime, Utc};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Where a record's bytes are in their trip to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WritePhase {
    /// Tracked, write not finished yet
    Pending = 0,
    /// File is on disk
    Durable = 1,
    /// Encoding or writing failed; there is no file
    Failed = 2,
    /// Evicted or released; any file must go
    Discarded = 3,
}

impl WritePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WritePhase::Pending,
            1 => WritePhase::Durable,
            2 => WritePhase::Failed,
            _ => WritePhase::Discarded,
        }
    }
}

/// One captured frame persisted as an image file
///
/// Clones share the write phase. Equality and hashing use the path only.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    timestamp: DateTime<Utc>,
    path: PathBuf,
    phase: Arc<AtomicU8>,
}

impl FrameRecord {
    pub fn new(timestamp: DateTime<Utc>, path: PathBuf) -> Self {
        Self {
            timestamp,
            path,
            phase: Arc::new(AtomicU8::new(WritePhase::Pending as u8)),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn phase(&self) -> WritePhase {
        WritePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// True once the write has finished one way or another
    pub fn is_settled(&self) -> bool {
        self.phase() != WritePhase::Pending
    }

    /// Pending → Durable. False if the record was discarded first.
    pub fn mark_durable(&self) -> bool {
        self.transition(WritePhase::Durable)
    }

    /// Pending → Failed. False if the record was discarded first.
    pub fn mark_failed(&self) -> bool {
        self.transition(WritePhase::Failed)
    }

    /// Move to Discarded, returning the phase it had before
    pub fn discard(&self) -> WritePhase {
        WritePhase::from_u8(self.phase.swap(WritePhase::Discarded as u8, Ordering::AcqRel))
    }

    fn transition(&self, to: WritePhase) -> bool {
        self.phase
            .compare_exchange(
                WritePhase::Pending as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl PartialEq for FrameRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FrameRecord {}

impl Hash for FrameRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_path() {
        let now = Utc::now();
        let a = FrameRecord::new(now, PathBuf::from("/tmp/a.png"));
        let b = FrameRecord::new(now - chrono::Duration::seconds(5), PathBuf::from("/tmp/a.png"));
        let c = FrameRecord::new(now, PathBuf::from("/tmp/c.png"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_phase_transitions() {
        let record = FrameRecord::new(Utc::now(), PathBuf::from("/tmp/x.png"));
        let shared = record.clone();
        assert_eq!(record.phase(), WritePhase::Pending);
        assert!(!record.is_settled());

        assert!(shared.mark_durable());
        assert_eq!(record.phase(), WritePhase::Durable);
        assert!(!record.mark_failed());

        assert_eq!(record.discard(), WritePhase::Durable);
        assert_eq!(shared.phase(), WritePhase::Discarded);
    }

    #[test]
    fn test_discard_before_write() {
        let record = FrameRecord::new(Utc::now(), PathBuf::from("/tmp/y.png"));
        assert_eq!(record.discard(), WritePhase::Pending);
        assert!(!record.mark_durable());
        assert_eq!(record.phase(), WritePhase::Discarded);
    }
}
