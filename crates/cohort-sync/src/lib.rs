//! Cohort Sync - Shared-room state for one client
//!
//! Three sans-IO components driven by the session loop:
//! - Presence: the local transform stream out, the remote participant cache in
//! - Moderator override: edge-triggered camera-follow and pointer streams
//! - Event router: typed workshop events in both directions
//!
//! None of them touch the network. Outbound work is returned as
//! [`cohort_wire::ClientMessage`] values for the caller to send.

pub mod events;
pub mod moderator;
pub mod presence;

pub use events::*;
pub use moderator::*;
pub use presence::*;
