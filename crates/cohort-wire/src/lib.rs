//! Cohort Wire - Message formats shared by clients and the relay
//!
//! This crate implements:
//! - Room protocol messages (client → relay, relay → client)
//! - Moderator override and pointer frames
//! - Discrete event envelopes
//! - Voice session units and the PCM16/base64 audio codec
//! - JSON datagram framing for packet transports

pub mod event;
pub mod frame;
pub mod moderator;
pub mod pcm;
pub mod room;
pub mod voice;

pub use event::*;
pub use frame::*;
pub use moderator::*;
pub use pcm::*;
pub use room::*;
pub use voice::*;
