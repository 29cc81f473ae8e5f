//! Encoder/muxer boundary
//!
//! The exporter only needs to open a session, push frames with
//! presentation times in increasing order while the session says it has
//! room, and finish. Backends implement [`Muxer`].

use super::types::{ContainerFormat, ExportError, VideoCodec, VideoQuality};
use crate::capture::RawFrame;
use std::path::PathBuf;
use std::time::Duration;

/// Transform applied to every frame before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    /// Quarter turn clockwise (portrait capture)
    Clockwise90,
}

/// Everything a backend needs to open an output file
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub output_path: PathBuf,
    pub container: ContainerFormat,
    pub codec: VideoCodec,
    pub quality: VideoQuality,
    pub rotation: Rotation,
    /// Nominal input rate in frames per second
    pub frame_rate: f64,
    /// Input frame size
    pub width: u32,
    pub height: u32,
}

pub trait Muxer: Send + Sync {
    /// Open a session; the session starts at time zero
    fn open(&self, settings: &SessionSettings) -> Result<Box<dyn MuxerSession>, ExportError>;
}

pub trait MuxerSession: Send {
    /// Backpressure flag: only append while this is true
    fn is_ready_for_more_data(&self) -> bool;

    /// Append one frame at `pts` from session start
    fn append(&mut self, frame: &RawFrame, pts: Duration) -> Result<(), ExportError>;

    /// Terminal error reported by the backend, if any
    fn error(&self) -> Option<String>;

    /// Close the input and wait for the output file to be complete
    fn finish(self: Box<Self>) -> Result<(), ExportError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Muxer that records what it was asked to do

    use super::*;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    pub enum MuxEvent {
        Opened(PathBuf),
        Appended(PathBuf, Duration),
        Finished(PathBuf),
    }

    #[derive(Default)]
    struct Shared {
        events: Mutex<Vec<MuxEvent>>,
        settings: Mutex<Vec<SessionSettings>>,
        /// Number of "not ready" answers before each append
        stalls_per_frame: AtomicUsize,
        stalls_seen: AtomicUsize,
        fail_finish: Mutex<Option<String>>,
        fail_open: Mutex<Option<(usize, String)>>,
        fail_append: Mutex<Option<(usize, String)>>,
        opens: AtomicUsize,
    }

    #[derive(Clone, Default)]
    pub struct RecordingMuxer {
        shared: Arc<Shared>,
    }

    impl RecordingMuxer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<MuxEvent> {
            self.shared.events.lock().clone()
        }

        pub fn settings(&self) -> Vec<SessionSettings> {
            self.shared.settings.lock().clone()
        }

        /// Presentation times appended to the session writing `path`
        pub fn pts_for(&self, path: &Path) -> Vec<Duration> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    MuxEvent::Appended(p, pts) if p == path => Some(pts),
                    _ => None,
                })
                .collect()
        }

        pub fn stall_each_frame(&self, times: usize) {
            self.shared.stalls_per_frame.store(times, Ordering::SeqCst);
        }

        pub fn stalls_seen(&self) -> usize {
            self.shared.stalls_seen.load(Ordering::SeqCst)
        }

        pub fn fail_finish_with(&self, message: &str) {
            *self.shared.fail_finish.lock() = Some(message.to_string());
        }

        /// Make the `n`th call to `open` (counting from zero) fail
        pub fn fail_open_number(&self, n: usize, message: &str) {
            *self.shared.fail_open.lock() = Some((n, message.to_string()));
        }

        /// Make every session's `n`th append (counting from zero) fail
        pub fn fail_append_number(&self, n: usize, message: &str) {
            *self.shared.fail_append.lock() = Some((n, message.to_string()));
        }
    }

    impl Muxer for RecordingMuxer {
        fn open(&self, settings: &SessionSettings) -> Result<Box<dyn MuxerSession>, ExportError> {
            let n = self.shared.opens.fetch_add(1, Ordering::SeqCst);
            if let Some((_, message)) = self
                .shared
                .fail_open
                .lock()
                .as_ref()
                .filter(|(failing, _)| *failing == n)
            {
                return Err(ExportError::Muxer(message.clone()));
            }

            self.shared
                .events
                .lock()
                .push(MuxEvent::Opened(settings.output_path.clone()));
            self.shared.settings.lock().push(settings.clone());
            Ok(Box::new(RecordingSession {
                path: settings.output_path.clone(),
                shared: self.shared.clone(),
                stalls_left: AtomicUsize::new(self.shared.stalls_per_frame.load(Ordering::SeqCst)),
                appended: 0,
            }))
        }
    }

    struct RecordingSession {
        path: PathBuf,
        shared: Arc<Shared>,
        stalls_left: AtomicUsize,
        appended: usize,
    }

    impl MuxerSession for RecordingSession {
        fn is_ready_for_more_data(&self) -> bool {
            let left = self.stalls_left.load(Ordering::SeqCst);
            if left == 0 {
                return true;
            }
            self.stalls_left.store(left - 1, Ordering::SeqCst);
            self.shared.stalls_seen.fetch_add(1, Ordering::SeqCst);
            false
        }

        fn append(&mut self, _frame: &RawFrame, pts: Duration) -> Result<(), ExportError> {
            assert_eq!(
                self.stalls_left.load(Ordering::SeqCst),
                0,
                "frame appended while the session reported backpressure"
            );
            if let Some((_, message)) = self
                .shared
                .fail_append
                .lock()
                .as_ref()
                .filter(|(failing, _)| *failing == self.appended)
            {
                return Err(ExportError::Muxer(message.clone()));
            }
            self.appended += 1;
            self.shared
                .events
                .lock()
                .push(MuxEvent::Appended(self.path.clone(), pts));
            self.stalls_left
                .store(self.shared.stalls_per_frame.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(())
        }

        fn error(&self) -> Option<String> {
            None
        }

        fn finish(self: Box<Self>) -> Result<(), ExportError> {
            if let Some(message) = self.shared.fail_finish.lock().clone() {
                return Err(ExportError::Muxer(message));
            }
            std::fs::write(&self.path, b"")?;
            self.shared
                .events
                .lock()
                .push(MuxEvent::Finished(self.path.clone()));
            Ok(())
        }
    }
}
