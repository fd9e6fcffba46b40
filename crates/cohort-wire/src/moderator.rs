//! Moderator override and pointer frames
//!
//! Both frames are edge-triggered on deactivation: while active one frame is
//! sent per tick, and exactly one `{active:false}` frame ends the stream.

use cohort_core::{Pose, Vec3};
use serde::{Deserialize, Serialize};

/// Forced view broadcast by the moderator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeratorOverride {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<Pose>,
}

impl ModeratorOverride {
    pub fn follow(camera: Pose) -> Self {
        Self {
            active: true,
            camera: Some(camera),
        }
    }

    pub fn released() -> Self {
        Self {
            active: false,
            camera: None,
        }
    }
}

/// Shared annotation ray
///
/// `target` is resolved by the moderator (scene hit or max-range point);
/// receivers only render the pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerRay {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Vec3>,
}

impl PointerRay {
    pub fn segment(origin: Vec3, target: Vec3) -> Self {
        Self {
            active: true,
            origin: Some(origin),
            target: Some(target),
        }
    }

    pub fn off() -> Self {
        Self {
            active: false,
            origin: None,
            target: None,
        }
    }

    /// The drawable segment, if the pointer is on and complete
    pub fn endpoints(&self) -> Option<(Vec3, Vec3)> {
        match (self.active, self.origin, self.target) {
            (true, Some(origin), Some(target)) => Some((origin, target)),
            _ => None,
        }
    }
}
