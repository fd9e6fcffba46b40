//! Cohort Voice - Audio Stream Engine
//!
//! Bidirectional PCM streaming between the local microphone/speakers and a
//! remote voice mentor session.
//!
//! # Playback
//!
//! Inbound chunks arrive at irregular intervals with no sequence numbers.
//! Each one is started at `max(next_start, now)` and advances `next_start`
//! by its duration, so consecutive chunks play back to back without gaps or
//! overlap.
//!
//! # Capture
//!
//! Microphone samples are cut into fixed frames, quantized to PCM16 and sent
//! as realtime input. At most one partial frame is held.

pub mod capture;
pub mod device;
pub mod engine;
pub mod recognizer;
pub mod scheduler;

pub use capture::*;
pub use device::*;
pub use engine::*;
pub use recognizer::*;
pub use scheduler::*;
