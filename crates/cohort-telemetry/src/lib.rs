//! Cohort Telemetry - Gaze Telemetry Collector
//!
//! Once per interval the collector hit-tests along the user's view and:
//! - tracks dwell on the hit target, announcing an active context once the
//!   user has looked at the same part long enough
//! - buffers one sample per hit
//! - hands the whole buffer over for upload at a count or age bound

pub mod buffer;
pub mod collector;
pub mod dwell;
pub mod sample;
pub mod upload;

pub use buffer::*;
pub use collector::*;
pub use dwell::*;
pub use sample::*;
pub use upload::*;
