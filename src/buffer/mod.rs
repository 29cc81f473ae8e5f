//! Rolling lookback storage
//!
//! - `FrameStore` persists individual frames as image files
//! - `RollingFrameBuffer` keeps the last window of them and owns eviction
//! - `Segment` is the frozen snapshot handed to the exporter

pub mod clock;
pub mod frame_store;
pub mod record;
pub mod rolling;
pub mod segment;

pub use clock::{Clock, ManualClock, SystemClock};
pub use frame_store::FrameStore;
pub use record::{FrameRecord, WritePhase};
pub use rolling::RollingFrameBuffer;
pub use segment::Segment;
