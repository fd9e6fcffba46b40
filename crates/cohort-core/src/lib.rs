//! Cohort Core - Fundamental types shared by every session component
//!
//! This crate defines:
//! - Identifiers (ConnectionId, RoomId, UserId)
//! - Geometry primitives (Vec3, Pose, TransformFrame, Ray)
//! - The participant model and roles
//! - Traits for the scene collaborators the engine consumes
//! - The common error type

pub mod error;
pub mod geometry;
pub mod id;
pub mod participant;
pub mod scene;

pub use error::*;
pub use geometry::*;
pub use id::*;
pub use participant::*;
pub use scene::*;
