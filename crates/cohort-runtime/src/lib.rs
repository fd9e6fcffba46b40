//! Cohort Runtime - Session composition
//!
//! A [`Session`] owns one client's presence agent, moderator channel, event
//! router and gaze collector, drives them from a single task, and starts the
//! voice mentor on demand. The relay connection is shared by all of them and
//! released once at teardown.

pub mod config;
pub mod logging;
pub mod session;

pub use config::*;
pub use logging::*;
pub use session::*;
