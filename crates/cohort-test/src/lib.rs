//! Cohort Test Harness - Chaos testing and end-to-end validation
//!
//! This crate provides:
//! - Lossy, reordering relay links
//! - A headless virtual scene
//! - Virtual audio devices with a manual playback clock
//! - Scripted voice, recognition and telemetry services
//! - A multi-client classroom simulator

pub mod audio;
pub mod chaos;
pub mod scene;
pub mod services;
pub mod simulator;

pub use audio::*;
pub use chaos::*;
pub use scene::*;
pub use services::*;
pub use simulator::*;
