//! Recorder module
//!
//! - `Recorder`: the state machine callers drive
//! - `FrameSink`: where capture sources deliver frames
//! - configuration types and file loading

pub mod config;
pub mod coordinator;
pub mod sink;
pub mod state;

pub use config::{AppConfig, Framerate, RecorderConfiguration, StorageLayout};
pub use coordinator::Recorder;
pub use sink::FrameSink;
pub use state::{RecorderState, StateObserver};
