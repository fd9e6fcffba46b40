//! Cohort Transport Layer - Room-scoped publish/forward relay
//!
//! This crate provides:
//! - The shared relay handle used by every session component
//! - A sans-IO room registry with the relay's forwarding rules
//! - An in-process relay for embedding and tests
//! - A UDP relay client and server

pub mod handle;
pub mod memory;
pub mod registry;
pub mod udp;

pub use handle::*;
pub use memory::*;
pub use registry::*;
pub use udp::*;
