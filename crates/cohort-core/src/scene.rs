//! Scene collaborators
//!
//! Rendering, input and hit-testing live outside the engine. The engine reads
//! poses and hit results through these traits once per tick and writes
//! moderator overrides back through [`ViewController`].

use crate::{Pose, Ray, Vec3};

/// Local input-device poses
pub trait PoseSource {
    /// World pose of the viewer's head/camera, if a camera exists
    fn head_pose(&self) -> Option<Pose>;

    /// Left controller pose, if tracked
    fn left_hand_pose(&self) -> Option<Pose> {
        None
    }

    /// Right controller pose, if tracked
    fn right_hand_pose(&self) -> Option<Pose> {
        None
    }
}

/// Ray intersection against the shared scene model
pub trait SceneProbe {
    /// Nearest intersection within `max_distance`, in world space
    fn intersect(&self, ray: &Ray, max_distance: f32) -> Option<Vec3>;
}

/// Result of a gaze hit-test
#[derive(Debug, Clone, PartialEq)]
pub struct GazeHit {
    /// Name of the scene sub-part that was hit
    pub target: String,
    /// Hit point in the model's local coordinates
    pub local_point: Vec3,
}

impl GazeHit {
    pub fn new(target: impl Into<String>, local_point: Vec3) -> Self {
        Self {
            target: target.into(),
            local_point,
        }
    }
}

/// Hit-test from the current view direction
pub trait GazeProbe {
    fn gaze_hit(&self) -> Option<GazeHit>;
}

/// Write access to the local view for received moderator frames
pub trait ViewController {
    /// One-shot absolute write of the camera rig pose
    fn apply_camera(&mut self, pose: &Pose);

    /// Render the moderator's pointer segment
    fn show_pointer(&mut self, origin: Vec3, target: Vec3);

    fn hide_pointer(&mut self);
}

/// Everything a session needs from the scene
pub trait SceneAdapter: PoseSource + SceneProbe + GazeProbe + ViewController + Send {}

impl<T> SceneAdapter for T where T: PoseSource + SceneProbe + GazeProbe + ViewController + Send {}

/// Poses captured for one presence tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocalPoses {
    pub head: Option<Pose>,
    pub left_hand: Option<Pose>,
    pub right_hand: Option<Pose>,
}

impl LocalPoses {
    pub fn capture<S: PoseSource + ?Sized>(source: &S) -> Self {
        Self {
            head: source.head_pose(),
            left_hand: source.left_hand_pose(),
            right_hand: source.right_hand_pose(),
        }
    }
}
